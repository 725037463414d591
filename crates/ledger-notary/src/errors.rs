use ledger_domain::{SecureHash, StateRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum NotaryError {
    #[error("input {state_ref} already consumed by {consuming_tx}")]
    Conflict { state_ref: StateRef, consuming_tx: SecureHash },
    #[error("invalid requester signature: {0}")] InvalidSignature(String),
    #[error("time window {0} does not contain the notary time")] TimeWindowInvalid(String),
    #[error("input {0} appears more than once")] DuplicateInputs(StateRef),
    #[error("replica lost leadership at term {term}")] LeadershipLost { term: u64 },
    #[error("replica {0} is not the leader")] NotLeader(u64),
    #[error("uniqueness provider unavailable: {0}")] Unavailable(String),
    #[error("storage: {0}")] Storage(String),
}

impl NotaryError {
    /// Errores tras los que el cliente puede reenviar la misma solicitud.
    pub fn is_retriable(&self) -> bool {
        matches!(self,
                 NotaryError::LeadershipLost { .. } | NotaryError::NotLeader(_) | NotaryError::Unavailable(_))
    }
}
