//! Conversión de errores de dominio, contratos y notario a `FlowError`.
use ledger_contracts::{InsufficientBalance, SelectionError, VerificationError};
use ledger_core::FlowError;
use ledger_domain::DomainError;
use ledger_notary::NotaryError;

pub trait ToFlowError {
    fn to_flow_error(self) -> FlowError;
}

impl ToFlowError for VerificationError {
    fn to_flow_error(self) -> FlowError {
        FlowError::ContractVerification(self.to_string())
    }
}

impl ToFlowError for InsufficientBalance {
    fn to_flow_error(self) -> FlowError {
        FlowError::InsufficientBalance { shortfall: self.shortfall.to_string() }
    }
}

impl ToFlowError for SelectionError {
    fn to_flow_error(self) -> FlowError {
        match self {
            SelectionError::Insufficient(e) => e.to_flow_error(),
            SelectionError::NonPositiveAmount => FlowError::UnexpectedInput(self.to_string()),
            SelectionError::Domain(e) => e.to_flow_error(),
        }
    }
}

impl ToFlowError for DomainError {
    fn to_flow_error(self) -> FlowError {
        match self {
            DomainError::InvalidSignature(_) | DomainError::MissingSignatures(_) | DomainError::UnresolvedInput(_) => {
                FlowError::ContractVerification(self.to_string())
            }
            DomainError::Serialization(msg) | DomainError::Encoding(msg) => FlowError::Serialization(msg),
            other => FlowError::Internal(other.to_string()),
        }
    }
}

impl ToFlowError for NotaryError {
    fn to_flow_error(self) -> FlowError {
        match self {
            NotaryError::Conflict { state_ref, consuming_tx } => {
                FlowError::NotaryConflict { state_ref: state_ref.to_string(),
                                            consuming_tx: consuming_tx.to_hex() }
            }
            other => FlowError::NotaryRejected(other.to_string()),
        }
    }
}

/// `?` sobre resultados de otras capas dentro de un flow.
pub trait ResultExt<T> {
    fn into_flow(self) -> Result<T, FlowError>;
}

impl<T, E: ToFlowError> ResultExt<T> for Result<T, E> {
    fn into_flow(self) -> Result<T, FlowError> {
        self.map_err(ToFlowError::to_flow_error)
    }
}
