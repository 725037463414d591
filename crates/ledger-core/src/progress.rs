//! Seguimiento de progreso de un flow: lista ordenada de pasos con nombre.
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::errors::FlowError;

struct TrackerState {
    steps: Vec<String>,
    current: Option<String>,
    tx: broadcast::Sender<String>,
}

#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<TrackerState>>,
}

impl ProgressTracker {
    pub fn new(steps: &[&str]) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { inner: Arc::new(Mutex::new(TrackerState { steps: steps.iter().map(|s| s.to_string()).collect(),
                                                         current: None,
                                                         tx })) }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn steps(&self) -> Vec<String> {
        self.lock().steps.clone()
    }

    pub fn current(&self) -> Option<String> {
        self.lock().current.clone()
    }

    /// Avanza al paso `step` (debe estar declarado) y lo publica.
    pub fn set_current(&self, step: &str) -> Result<(), FlowError> {
        let mut state = self.lock();
        if !state.steps.iter().any(|s| s == step) {
            return Err(FlowError::UnknownProgressStep(step.to_string()));
        }
        if state.current.as_deref() == Some(step) {
            return Ok(());
        }
        state.current = Some(step.to_string());
        let _ = state.tx.send(step.to_string());
        Ok(())
    }

    /// Restaura el paso actual tras un reinicio, sin publicarlo.
    pub(crate) fn restore(&self, step: Option<String>) {
        self.lock().current = step;
    }

    pub fn subscribe(&self) -> ProgressStream {
        let state = self.lock();
        ProgressStream { first: state.current.clone(),
                         rx: Some(state.tx.subscribe()) }
    }
}

/// Stream de progreso.
///
/// Entrega primero el paso **actual** en el momento de suscribirse y después
/// cada transición posterior. Los pasos anteriores a la suscripción no se
/// reproducen. El stream termina cuando el flow termina.
pub struct ProgressStream {
    first: Option<String>,
    rx: Option<broadcast::Receiver<String>>,
}

impl ProgressStream {
    /// Stream ya terminado (flow inexistente o finalizado).
    pub fn closed() -> Self {
        Self { first: None,
               rx: None }
    }

    pub async fn next(&mut self) -> Option<String> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(step) => return Some(step),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_current_then_future_steps() {
        let tracker = ProgressTracker::new(&["a", "b", "c"]);
        tracker.set_current("a").unwrap();
        tracker.set_current("b").unwrap();

        let mut stream = tracker.subscribe();
        tracker.set_current("c").unwrap();
        drop(tracker);

        assert_eq!(stream.next().await.as_deref(), Some("b"));
        assert_eq!(stream.next().await.as_deref(), Some("c"));
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn undeclared_steps_are_rejected() {
        let tracker = ProgressTracker::new(&["a"]);
        assert_eq!(tracker.set_current("zzz"), Err(FlowError::UnknownProgressStep("zzz".into())));
    }
}
