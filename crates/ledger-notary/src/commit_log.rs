//! Log de commits: máquina de estados determinista compartida por todos los
//! `UniquenessProvider`.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ledger_domain::{SecureHash, StateRef};
use serde::{Deserialize, Serialize};

use crate::errors::NotaryError;

/// Solicitud de consumo de un conjunto de estados por una transacción.
/// `requested_at` viaja con la solicitud para que todas las réplicas
/// registren el mismo instante.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub states: Vec<StateRef>,
    pub tx_id: SecureHash,
    pub requester: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub state_ref: StateRef,
    pub consuming_tx: SecureHash,
    pub input_index: u32,
    pub requesting_party: String,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    Committed,
    /// Todas las entradas ya estaban consumidas por la misma transacción.
    AlreadyCommitted,
}

/// Decisión sobre una solicitud, sin aplicarla.
#[derive(Debug, PartialEq, Eq)]
pub enum Evaluation {
    Fresh,
    Replay,
    Conflict { state_ref: StateRef, consuming_tx: SecureHash },
}

/// Decide una solicitud contra una función de consulta del log. La usan el
/// log en memoria y el backend Postgres.
pub fn evaluate_commit<F>(request: &CommitRequest, mut consumer_of: F) -> Result<Evaluation, NotaryError>
    where F: FnMut(&StateRef) -> Result<Option<SecureHash>, NotaryError>
{
    let mut all_ours = !request.states.is_empty();
    for state in &request.states {
        match consumer_of(state)? {
            Some(tx) if tx != request.tx_id => {
                return Ok(Evaluation::Conflict { state_ref: *state,
                                                 consuming_tx: tx })
            }
            Some(_) => {}
            None => all_ours = false,
        }
    }
    Ok(if all_ours { Evaluation::Replay } else { Evaluation::Fresh })
}

/// Log en memoria. Append-only: un `StateRef` aparece a lo sumo una vez.
#[derive(Debug, Default, Clone)]
pub struct CommitLog {
    entries: HashMap<StateRef, CommitEntry>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, state: &StateRef) -> Option<&CommitEntry> {
        self.entries.get(state)
    }

    /// Check-and-set de todo o nada.
    pub fn commit(&mut self, request: &CommitRequest) -> Result<CommitOutcome, NotaryError> {
        let evaluation = evaluate_commit(request, |s| Ok(self.entries.get(s).map(|e| e.consuming_tx)))?;
        match evaluation {
            Evaluation::Conflict { state_ref, consuming_tx } => {
                log::debug!("commit_log.conflict tx={} state={state_ref} consumer={consuming_tx}",
                            request.tx_id.short());
                Err(NotaryError::Conflict { state_ref, consuming_tx })
            }
            Evaluation::Replay => Ok(CommitOutcome::AlreadyCommitted),
            Evaluation::Fresh => {
                for (i, state) in request.states.iter().enumerate() {
                    self.entries.entry(*state).or_insert_with(|| CommitEntry { state_ref: *state,
                                                                               consuming_tx: request.tx_id,
                                                                               input_index: i as u32,
                                                                               requesting_party: request.requester.clone(),
                                                                               committed_at: request.requested_at });
                }
                Ok(CommitOutcome::Committed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(n: u8, index: u32) -> StateRef {
        StateRef::new(SecureHash::sha256(&[n]), index)
    }

    fn request(tx: u8, states: Vec<StateRef>) -> CommitRequest {
        CommitRequest { states,
                        tx_id: SecureHash::sha256(&[100 + tx]),
                        requester: "Alice".into(),
                        requested_at: Utc::now() }
    }

    #[test]
    fn commit_then_replay_then_conflict() {
        let mut log = CommitLog::new();
        let a = request(1, vec![state(1, 0), state(1, 1)]);
        assert_eq!(log.commit(&a).unwrap(), CommitOutcome::Committed);
        assert_eq!(log.commit(&a).unwrap(), CommitOutcome::AlreadyCommitted);
        assert_eq!(log.len(), 2);

        let b = request(2, vec![state(2, 0), state(1, 1)]);
        let err = log.commit(&b).unwrap_err();
        assert_eq!(err,
                   NotaryError::Conflict { state_ref: state(1, 1),
                                           consuming_tx: a.tx_id });
        // Todo o nada: la entrada libre de `b` no se registró.
        assert!(log.get(&state(2, 0)).is_none());
    }

    #[test]
    fn conflict_names_first_offending_input() {
        let mut log = CommitLog::new();
        log.commit(&request(1, vec![state(1, 0)])).unwrap();
        log.commit(&request(2, vec![state(2, 0)])).unwrap();
        let err = log.commit(&request(3, vec![state(3, 0), state(2, 0), state(1, 0)])).unwrap_err();
        assert!(matches!(err, NotaryError::Conflict { state_ref, .. } if state_ref == state(2, 0)));
    }

    #[test]
    fn entry_records_input_index_and_requester() {
        let mut log = CommitLog::new();
        let r = request(1, vec![state(1, 0), state(1, 5)]);
        log.commit(&r).unwrap();
        let e = log.get(&state(1, 5)).unwrap();
        assert_eq!(e.input_index, 1);
        assert_eq!(e.requesting_party, "Alice");
        assert_eq!(e.committed_at, r.requested_at);
    }
}
