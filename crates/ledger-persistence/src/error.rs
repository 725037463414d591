//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use ledger_core::CheckpointError;
use ledger_notary::NotaryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")] UniqueViolation(String),
    #[error("check violation: {0}")] CheckViolation(String),
    #[error("not found")] NotFound,
    #[error("serialization conflict (retryable)")] SerializationConflict,
    #[error("transient IO / connection pool error: {0}")] TransientIo(String),
    #[error("corrupted row: {0}")] CorruptedRow(String),
    #[error("configuration: {0}")] Config(String),
    #[error("unknown database error: {0}")] Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::CorruptedRow(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<PersistenceError> for CheckpointError {
    fn from(e: PersistenceError) -> Self {
        CheckpointError::Backend(e.to_string())
    }
}

impl From<PersistenceError> for NotaryError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::TransientIo(msg) => NotaryError::Unavailable(msg),
            other => NotaryError::Storage(other.to_string()),
        }
    }
}
