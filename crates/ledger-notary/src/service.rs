//! `NotaryService`: valida la solicitud, consulta el proveedor de unicidad y
//! firma el id de la transacción.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledger_domain::{KeyPair, Party, TransactionSignature};

use crate::commit_log::{CommitOutcome, CommitRequest};
use crate::errors::NotaryError;
use crate::request::{NotarisationRequest, NotarisationResponse};
use crate::uniqueness::UniquenessProvider;

pub struct NotaryService {
    identity: Party,
    key: KeyPair,
    provider: Arc<dyn UniquenessProvider>,
}

impl NotaryService {
    pub fn new(identity: Party, key: KeyPair, provider: Arc<dyn UniquenessProvider>) -> Self {
        Self { identity,
               key,
               provider }
    }

    pub fn identity(&self) -> &Party {
        &self.identity
    }

    pub fn provider(&self) -> &Arc<dyn UniquenessProvider> {
        &self.provider
    }

    /// Comprobaciones que no tocan el log.
    pub fn validate(&self, request: &NotarisationRequest, now: DateTime<Utc>) -> Result<(), NotaryError> {
        request.verify_signature()?;
        if let Some(window) = &request.time_window {
            if !window.contains(now) {
                return Err(NotaryError::TimeWindowInvalid(format!("{:?}..{:?}", window.from, window.until)));
            }
        }
        if let Some(dup) = request.first_duplicate() {
            return Err(NotaryError::DuplicateInputs(dup));
        }
        Ok(())
    }

    /// Notariza. Reenviar la misma transacción devuelve la misma firma
    /// (ed25519 es determinista) sin volver a escribir el log.
    pub async fn notarise(&self,
                          request: &NotarisationRequest,
                          now: DateTime<Utc>)
                          -> Result<TransactionSignature, NotaryError> {
        self.validate(request, now)?;
        let outcome = self.provider
                          .commit(CommitRequest { states: request.inputs.clone(),
                                                  tx_id: request.tx_id,
                                                  requester: request.requester.name.clone(),
                                                  requested_at: now })
                          .await;
        match &outcome {
            Ok(CommitOutcome::Committed) => {
                log::info!("notary.commit tx={} inputs={} requester={}",
                           request.tx_id.short(),
                           request.inputs.len(),
                           request.requester)
            }
            Ok(CommitOutcome::AlreadyCommitted) => log::info!("notary.replay tx={}", request.tx_id.short()),
            Err(e) => log::warn!("notary.reject tx={} error={e}", request.tx_id.short()),
        }
        outcome?;
        Ok(TransactionSignature::sign(&self.key, &request.tx_id))
    }

    pub async fn respond(&self, request: &NotarisationRequest, now: DateTime<Utc>) -> NotarisationResponse {
        NotarisationResponse::from_result(self.notarise(request, now).await)
    }
}
