use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::checkpoint::FlowStatus;
use crate::errors::FlowError;
use crate::progress::ProgressStream;
use crate::FlowId;

pub type FlowOutcome = Result<Value, FlowError>;

/// Resultado futuro de un flow.
pub struct FlowResult {
    rx: watch::Receiver<Option<FlowOutcome>>,
}

impl FlowResult {
    pub(crate) fn new(rx: watch::Receiver<Option<FlowOutcome>>) -> Self {
        Self { rx }
    }

    /// Resultado si el flow ya terminó.
    pub fn try_get(&self) -> Option<FlowOutcome> {
        self.rx.borrow().clone()
    }

    pub async fn wait(mut self) -> FlowOutcome {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self.rx
                           .borrow()
                           .clone()
                           .unwrap_or_else(|| Err(FlowError::Internal("engine stopped before the flow finished".into())));
            }
        }
    }

    pub async fn wait_as<T: DeserializeOwned>(self) -> Result<T, FlowError> {
        let value = self.wait().await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Handle devuelto al arrancar un flow.
pub struct FlowHandle {
    pub id: FlowId,
    pub progress: ProgressStream,
    pub result: FlowResult,
}

/// Fila del listado operativo de flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowInfo {
    pub flow_id: FlowId,
    pub status: FlowStatus,
    pub logic_type: String,
    pub progress_step: Option<String>,
    pub error: Option<FlowError>,
}
