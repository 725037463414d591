//! Errores del motor de flows.
//!
//! `FlowError` es serializable: viaja dentro de los checkpoints FAILED y como
//! aviso de error a las contrapartes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionId;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum FlowError {
    #[error("contract verification failed: {0}")] ContractVerification(String),
    #[error("insufficient balance, missing {shortfall}")] InsufficientBalance { shortfall: String },
    #[error("notary conflict on {state_ref}, consumed by {consuming_tx}")]
    NotaryConflict { state_ref: String, consuming_tx: String },
    #[error("notary rejected the request: {0}")] NotaryRejected(String),
    #[error("timed out waiting on session {session}")] SessionTimeout { session: SessionId },
    #[error("counterparty {peer} failed: {message}")] Counterparty { peer: String, message: String },
    #[error("session {session} ended by counterparty")] SessionEnded { session: SessionId },
    #[error("unknown session {0}")] UnknownSession(SessionId),
    #[error("checkpoint of flow {flow_id} is corrupted: {reason}")] CheckpointCorruption { flow_id: Uuid, reason: String },
    #[error("no flow registered for {0}")] UnknownLogicType(String),
    #[error("unknown progress step {0}")] UnknownProgressStep(String),
    #[error("flow aborted")] Aborted,
    #[error("unexpected input: {0}")] UnexpectedInput(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("transport: {0}")] Transport(String),
    #[error("checkpoint store: {0}")] Checkpoint(String),
    #[error("internal: {0}")] Internal(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Serialization(e.to_string())
    }
}

impl From<TransportError> for FlowError {
    fn from(e: TransportError) -> Self {
        FlowError::Transport(e.to_string())
    }
}

impl From<CheckpointError> for FlowError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::Corrupted { flow_id, reason } => FlowError::CheckpointCorruption { flow_id, reason },
            other => FlowError::Checkpoint(other.to_string()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CheckpointError {
    #[error("checkpoint {0} not found")] NotFound(Uuid),
    #[error("checkpoint {flow_id} corrupted: {reason}")] Corrupted { flow_id: Uuid, reason: String },
    #[error("io: {0}")] Io(String),
    #[error("backend: {0}")] Backend(String),
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        CheckpointError::Io(e.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TransportError {
    #[error("endpoint {0} is closed")] Closed(String),
    #[error("malformed envelope: {0}")] Malformed(String),
}
