//! Checkpoints: foto durable de un flow en un punto de suspensión.
//!
//! Una store nunca expone un checkpoint a medio escribir: cada
//! implementación reemplaza el registro completo de forma atómica.
mod file;
mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CheckpointError, FlowError};
use crate::hashing::hash_str;
use crate::session::{Session, SessionId};
use crate::FlowId;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowStatus {
    Runnable,
    Suspended,
    Completed,
    Failed,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Runnable => "RUNNABLE",
            FlowStatus::Suspended => "SUSPENDED",
            FlowStatus::Completed => "COMPLETED",
            FlowStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNABLE" => Some(FlowStatus::Runnable),
            "SUSPENDED" => Some(FlowStatus::Suspended),
            "COMPLETED" => Some(FlowStatus::Completed),
            "FAILED" => Some(FlowStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowStatus::Completed | FlowStatus::Failed)
    }
}

/// Qué espera el flow; determina con qué entrada se reanuda tras reiniciar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitRecord {
    /// Aún no ejecutó ningún paso.
    Start,
    /// Envió mensajes y continúa en cuanto se confirme el envío.
    Sent,
    /// Espera el siguiente mensaje de `session`; el deadline es absoluto.
    Session {
        session: SessionId,
        deadline: Option<DateTime<Utc>>,
    },
    /// Espera una operación externa (p. ej. un commit de consenso).
    Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_id: FlowId,
    pub logic_type: String,
    pub status: FlowStatus,
    /// Continuación serializada (JSON del estado del flow).
    pub continuation: String,
    pub sessions: Vec<SessionRecord>,
    pub wait: Option<WaitRecord>,
    pub progress_step: Option<String>,
    pub error: Option<FlowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// blake3 de `continuation`.
    pub checksum: String,
}

/// Parte persistida de una sesión.
pub type SessionRecord = Session;

impl Checkpoint {
    /// Recalcula el checksum; se llama justo antes de `put`.
    pub fn seal(&mut self) {
        self.checksum = hash_str(&self.continuation);
    }

    pub fn verify_integrity(&self) -> Result<(), CheckpointError> {
        if self.checksum != hash_str(&self.continuation) {
            return Err(CheckpointError::Corrupted { flow_id: self.flow_id,
                                                    reason: "checksum mismatch".into() });
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, CheckpointError> {
        serde_json::to_string(self).map_err(|e| CheckpointError::Backend(e.to_string()))
    }

    /// Decodifica y valida un registro leído de una store.
    pub fn decode(flow_id: FlowId, raw: &str) -> Result<Self, CheckpointError> {
        let cp: Checkpoint = serde_json::from_str(raw).map_err(|e| CheckpointError::Corrupted { flow_id,
                                                                                              reason: e.to_string() })?;
        cp.verify_integrity()?;
        Ok(cp)
    }
}

pub trait CheckpointStore: Send + Sync {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    fn get(&self, flow_id: FlowId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Borrar un checkpoint inexistente no es un error.
    fn delete(&self, flow_id: FlowId) -> Result<(), CheckpointError>;

    fn list_ids(&self) -> Result<Vec<FlowId>, CheckpointError>;

    /// Carga todos los checkpoints; los corruptos se reportan por separado
    /// para que un registro dañado no impida recuperar el resto.
    fn scan(&self) -> Result<Vec<(FlowId, Result<Checkpoint, CheckpointError>)>, CheckpointError> {
        let mut out = Vec::new();
        for id in self.list_ids()? {
            match self.get(id) {
                Ok(Some(cp)) => out.push((id, Ok(cp))),
                Ok(None) => {}
                Err(e) => out.push((id, Err(e))),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::messaging::PeerId;

    pub fn sample(flow_id: FlowId) -> Checkpoint {
        let now = Utc::now();
        let session = Session::new(SessionId::new(), PeerId::new("Bob"), "ping", true);
        let mut cp = Checkpoint { flow_id,
                                  logic_type: "ping".into(),
                                  status: FlowStatus::Suspended,
                                  continuation: "{\"Waiting\":{\"n\":1}}".into(),
                                  wait: Some(WaitRecord::Session { session: session.id,
                                                                   deadline: None }),
                                  sessions: vec![session],
                                  progress_step: Some("Sending".into()),
                                  error: None,
                                  created_at: now,
                                  updated_at: now,
                                  checksum: String::new() };
        cp.seal();
        cp
    }

    #[test]
    fn tampered_continuation_is_detected() {
        let id = FlowId::new_v4();
        let mut cp = sample(id);
        cp.continuation.push(' ');
        let raw = cp.encode().unwrap();
        assert!(matches!(Checkpoint::decode(id, &raw), Err(CheckpointError::Corrupted { .. })));
        assert!(matches!(Checkpoint::decode(id, "{not json"), Err(CheckpointError::Corrupted { .. })));
    }
}
