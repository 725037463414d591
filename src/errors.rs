use ledger_core::{CheckpointError, FlowError};
use ledger_notary::raft::RaftError;
use ledger_notary::NotaryError;
use ledger_persistence::PersistenceError;
use thiserror::Error;

/// Errores del ensamblado de nodos y de la demo.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")] Config(String),
    #[error("flow error: {0}")] Flow(#[from] FlowError),
    #[error("checkpoint error: {0}")] Checkpoint(#[from] CheckpointError),
    #[error("notary error: {0}")] Notary(#[from] NotaryError),
    #[error("raft error: {0}")] Raft(#[from] RaftError),
    #[error("persistence error: {0}")] Persistence(#[from] PersistenceError),
    #[error("io error: {0}")] Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_errors_keep_their_message() {
        let err: AppError = FlowError::InsufficientBalance { shortfall: "5 USD".into() }.into();
        assert!(err.to_string().starts_with("flow error: "));
        assert!(err.to_string().contains("5 USD"));
    }
}
