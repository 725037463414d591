use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errores del modelo de dominio (aritmética de montos, firmas, resolución).
#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum DomainError {
    #[error("token mismatch: {left} vs {right}")]
    TokenMismatch { left: String, right: String },
    #[error("amount overflow")]
    Overflow,
    #[error("amount underflow: {have} < {need}")]
    Underflow { have: u64, need: u64 },
    #[error("cannot sum an empty list of amounts")]
    EmptySum,
    #[error("invalid signature by {0}")]
    InvalidSignature(String),
    #[error("missing signatures from: {0:?}")]
    MissingSignatures(Vec<String>),
    #[error("unresolved input state {0}")]
    UnresolvedInput(String),
    #[error("invalid encoding: {0}")]
    Encoding(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Serialization(e.to_string())
    }
}
