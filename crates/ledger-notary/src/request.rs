//! Mensajes notariales intercambiados por una sesión con el notario.
use std::collections::BTreeSet;

use ledger_domain::{DigitalSignature, KeyPair, Party, SecureHash, StateRef, TimeWindow, TransactionSignature};
use serde::{Deserialize, Serialize};

use crate::errors::NotaryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarisationRequest {
    pub tx_id: SecureHash,
    pub inputs: Vec<StateRef>,
    pub time_window: Option<TimeWindow>,
    pub requester: Party,
    /// Firma del solicitante sobre `tx_id`.
    pub signature: DigitalSignature,
}

impl NotarisationRequest {
    pub fn new(tx_id: SecureHash,
               inputs: Vec<StateRef>,
               time_window: Option<TimeWindow>,
               requester: Party,
               key: &KeyPair)
               -> Self {
        let signature = key.sign(tx_id.as_bytes());
        Self { tx_id,
               inputs,
               time_window,
               requester,
               signature }
    }

    pub fn verify_signature(&self) -> Result<(), NotaryError> {
        self.requester
            .owning_key
            .verify(self.tx_id.as_bytes(), &self.signature)
            .map_err(|e| NotaryError::InvalidSignature(e.to_string()))
    }

    pub fn first_duplicate(&self) -> Option<StateRef> {
        let mut seen = BTreeSet::new();
        self.inputs.iter().find(|s| !seen.insert(**s)).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotarisationResponse {
    Signed(TransactionSignature),
    Conflict { state_ref: StateRef, consuming_tx: SecureHash },
    Rejected(NotaryError),
}

impl NotarisationResponse {
    pub fn from_result(result: Result<TransactionSignature, NotaryError>) -> Self {
        match result {
            Ok(sig) => NotarisationResponse::Signed(sig),
            Err(NotaryError::Conflict { state_ref, consuming_tx }) => {
                NotarisationResponse::Conflict { state_ref, consuming_tx }
            }
            Err(other) => NotarisationResponse::Rejected(other),
        }
    }

    pub fn into_result(self) -> Result<TransactionSignature, NotaryError> {
        match self {
            NotarisationResponse::Signed(sig) => Ok(sig),
            NotarisationResponse::Conflict { state_ref, consuming_tx } => {
                Err(NotaryError::Conflict { state_ref, consuming_tx })
            }
            NotarisationResponse::Rejected(e) => Err(e),
        }
    }
}
