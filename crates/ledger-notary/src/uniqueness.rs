use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ledger_domain::StateRef;

use crate::commit_log::{CommitEntry, CommitLog, CommitOutcome, CommitRequest};
use crate::errors::NotaryError;

/// Árbitro de unicidad de entradas. `commit` es todo o nada y, para una
/// misma transacción, idempotente.
#[async_trait]
pub trait UniquenessProvider: Send + Sync {
    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome, NotaryError>;

    async fn consumer_of(&self, state: &StateRef) -> Result<Option<CommitEntry>, NotaryError>;
}

/// Notario de un solo nodo: un mutex alrededor del log.
#[derive(Default)]
pub struct InMemoryUniquenessProvider {
    log: Mutex<CommitLog>,
}

impl InMemoryUniquenessProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CommitLog> {
        self.log.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl UniquenessProvider for InMemoryUniquenessProvider {
    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome, NotaryError> {
        self.lock().commit(&request)
    }

    async fn consumer_of(&self, state: &StateRef) -> Result<Option<CommitEntry>, NotaryError> {
        Ok(self.lock().get(state).cloned())
    }
}
