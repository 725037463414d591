//! Estado en memoria de un flow vivo.
use chrono::{DateTime, Utc};

use crate::checkpoint::{Checkpoint, FlowStatus, WaitRecord};
use crate::engine::handle::FlowInfo;
use crate::errors::FlowError;
use crate::flow::ErasedFlow;
use crate::messaging::MessageId;
use crate::progress::ProgressTracker;
use crate::session::SessionTable;
use crate::FlowId;

pub(crate) struct FlowRuntime<S> {
    pub id: FlowId,
    pub logic_type: String,
    pub flow: Box<dyn ErasedFlow<S>>,
    pub status: FlowStatus,
    pub sessions: SessionTable,
    pub wait: Option<WaitRecord>,
    pub progress: ProgressTracker,
    pub created_at: DateTime<Utc>,
    /// Se incrementa en cada suspensión; timers y operaciones de una espera
    /// anterior se ignoran.
    pub epoch: u64,
    /// Mensajes consumidos cuyo acuse espera al próximo checkpoint.
    pub pending_acks: Vec<MessageId>,
    pub error: Option<FlowError>,
}

impl<S> FlowRuntime<S> {
    pub fn new(id: FlowId, logic_type: &str, flow: Box<dyn ErasedFlow<S>>, now: DateTime<Utc>) -> Self {
        let progress = ProgressTracker::new(flow.progress_steps());
        Self { id,
               logic_type: logic_type.to_string(),
               flow,
               status: FlowStatus::Runnable,
               sessions: SessionTable::new(),
               wait: Some(WaitRecord::Start),
               progress,
               created_at: now,
               epoch: 0,
               pending_acks: Vec::new(),
               error: None }
    }

    /// Reconstruye el runtime a partir de un checkpoint y la continuación ya
    /// deserializada.
    pub fn from_checkpoint(cp: Checkpoint, flow: Box<dyn ErasedFlow<S>>) -> Self {
        let progress = ProgressTracker::new(flow.progress_steps());
        progress.restore(cp.progress_step.clone());
        Self { id: cp.flow_id,
               logic_type: cp.logic_type,
               flow,
               status: cp.status,
               sessions: cp.sessions.into_iter().map(|s| (s.id, s)).collect(),
               wait: cp.wait,
               progress,
               created_at: cp.created_at,
               epoch: 0,
               pending_acks: Vec::new(),
               error: cp.error }
    }

    pub fn to_checkpoint(&self, now: DateTime<Utc>) -> Result<Checkpoint, FlowError> {
        let mut cp = Checkpoint { flow_id: self.id,
                                  logic_type: self.logic_type.clone(),
                                  status: self.status,
                                  continuation: self.flow.snapshot()?,
                                  sessions: self.sessions.values().cloned().collect(),
                                  wait: self.wait.clone(),
                                  progress_step: self.progress.current(),
                                  error: self.error.clone(),
                                  created_at: self.created_at,
                                  updated_at: now,
                                  checksum: String::new() };
        cp.seal();
        Ok(cp)
    }

    pub fn info(&self) -> FlowInfo {
        FlowInfo { flow_id: self.id,
                   status: self.status,
                   logic_type: self.logic_type.clone(),
                   progress_step: self.progress.current(),
                   error: self.error.clone() }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
