use async_trait::async_trait;
use ledger_domain::StateRef;
use tokio::sync::oneshot;

use crate::commit_log::{CommitEntry, CommitOutcome, CommitRequest};
use crate::errors::NotaryError;
use crate::raft::cluster::{current_leader, ReplicaCommand, ReplicaHandle};
use crate::raft::config::RaftConfig;
use crate::raft::message::NodeId;
use crate::uniqueness::UniquenessProvider;

/// Proveedor de unicidad replicado. Envía cada solicitud al líder actual y
/// la reintenta, con el mismo id de transacción, ante pérdida de liderazgo o
/// timeout; si un intento anterior llegó a comprometerse, el reintento
/// obtiene `AlreadyCommitted`.
pub struct RaftUniquenessProvider {
    replicas: Vec<ReplicaHandle>,
    config: RaftConfig,
}

impl RaftUniquenessProvider {
    pub(crate) fn new(replicas: Vec<ReplicaHandle>, config: RaftConfig) -> Self {
        Self { replicas, config }
    }

    fn leader(&self) -> Option<&ReplicaHandle> {
        let statuses: Vec<_> = self.replicas.iter().map(|r| *r.status.borrow()).collect();
        let id: NodeId = current_leader(&statuses)?;
        self.replicas.iter().find(|r| r.id == id)
    }

    async fn attempt(&self, request: &CommitRequest) -> Result<CommitOutcome, NotaryError> {
        let leader = self.leader().ok_or_else(|| NotaryError::Unavailable("no leader".into()))?;
        let (tx, rx) = oneshot::channel();
        leader.commands
              .send(ReplicaCommand::Propose { request: request.clone(),
                                              reply: tx })
              .map_err(|_| NotaryError::Unavailable(format!("replica {} stopped", leader.id)))?;
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => Err(NotaryError::Unavailable(format!("replica {} dropped the request", leader.id))),
            Err(_) => Err(NotaryError::Unavailable(format!("replica {} timed out", leader.id))),
        }
    }
}

#[async_trait]
impl UniquenessProvider for RaftUniquenessProvider {
    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome, NotaryError> {
        let mut last_error = NotaryError::Unavailable("no attempt made".into());
        for attempt in 1..=self.config.max_attempts {
            match self.attempt(&request).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retriable() => {
                    log::warn!("raft.provider:retry tx={} attempt={attempt} error={e}", request.tx_id.short());
                    last_error = e;
                    tokio::time::sleep(self.config.tick * self.config.heartbeat_ticks).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    async fn consumer_of(&self, state: &StateRef) -> Result<Option<CommitEntry>, NotaryError> {
        let leader = self.leader().ok_or_else(|| NotaryError::Unavailable("no leader".into()))?;
        let (tx, rx) = oneshot::channel();
        leader.commands
              .send(ReplicaCommand::ConsumerOf { state: *state,
                                                 reply: tx })
              .map_err(|_| NotaryError::Unavailable(format!("replica {} stopped", leader.id)))?;
        rx.await.map_err(|_| NotaryError::Unavailable(format!("replica {} dropped the query", leader.id)))
    }
}
