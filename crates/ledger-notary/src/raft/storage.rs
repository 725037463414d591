use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raft::message::{LogEntry, LogIndex, NodeId, Term};

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RaftError {
    #[error("not the leader (leader hint: {leader:?})")] NotLeader { leader: Option<NodeId> },
    #[error("raft storage: {0}")] Storage(String),
}

/// Estado que debe sobrevivir a un reinicio antes de responder a un voto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub term: Term,
    pub voted_for: Option<NodeId>,
}

/// Log y estado duro de una réplica. Índices desde 1; el índice 0 es el
/// centinela con término 0.
///
/// `save_hard_state`, `append` y `truncate_from` sólo vuelven `Ok` con el
/// cambio ya persistido: `RaftNode` emite votos y acks después de llamarlos.
pub trait RaftStorage: Send {
    fn hard_state(&self) -> HardState;

    fn save_hard_state(&mut self, state: HardState) -> Result<(), RaftError>;

    fn last_index(&self) -> LogIndex;

    fn term_at(&self, index: LogIndex) -> Option<Term>;

    fn entry(&self, index: LogIndex) -> Option<LogEntry>;

    /// Hasta `max` entradas desde `from` inclusive.
    fn entries_from(&self, from: LogIndex, max: usize) -> Vec<LogEntry>;

    /// Añade al final; los índices deben ser consecutivos.
    fn append(&mut self, entries: &[LogEntry]) -> Result<(), RaftError>;

    /// Descarta `from` y todo lo posterior.
    fn truncate_from(&mut self, from: LogIndex) -> Result<(), RaftError>;

    fn last_term(&self) -> Term {
        self.term_at(self.last_index()).unwrap_or(0)
    }
}

impl<S: RaftStorage + ?Sized> RaftStorage for Box<S> {
    fn hard_state(&self) -> HardState {
        (**self).hard_state()
    }

    fn save_hard_state(&mut self, state: HardState) -> Result<(), RaftError> {
        (**self).save_hard_state(state)
    }

    fn last_index(&self) -> LogIndex {
        (**self).last_index()
    }

    fn term_at(&self, index: LogIndex) -> Option<Term> {
        (**self).term_at(index)
    }

    fn entry(&self, index: LogIndex) -> Option<LogEntry> {
        (**self).entry(index)
    }

    fn entries_from(&self, from: LogIndex, max: usize) -> Vec<LogEntry> {
        (**self).entries_from(from, max)
    }

    fn append(&mut self, entries: &[LogEntry]) -> Result<(), RaftError> {
        (**self).append(entries)
    }

    fn truncate_from(&mut self, from: LogIndex) -> Result<(), RaftError> {
        (**self).truncate_from(from)
    }
}

/// Sólo memoria: una réplica que reinicia con este storage vuelve vacía.
#[derive(Debug, Default, Clone)]
pub struct MemRaftStorage {
    hard: HardState,
    log: Vec<LogEntry>,
}

impl MemRaftStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RaftStorage for MemRaftStorage {
    fn hard_state(&self) -> HardState {
        self.hard
    }

    fn save_hard_state(&mut self, state: HardState) -> Result<(), RaftError> {
        self.hard = state;
        Ok(())
    }

    fn last_index(&self) -> LogIndex {
        self.log.len() as LogIndex
    }

    fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.log.get(index as usize - 1).map(|e| e.term)
    }

    fn entry(&self, index: LogIndex) -> Option<LogEntry> {
        if index == 0 {
            return None;
        }
        self.log.get(index as usize - 1).cloned()
    }

    fn entries_from(&self, from: LogIndex, max: usize) -> Vec<LogEntry> {
        let start = from.max(1) as usize - 1;
        self.log.iter().skip(start).take(max).cloned().collect()
    }

    fn append(&mut self, entries: &[LogEntry]) -> Result<(), RaftError> {
        for e in entries {
            if e.index != self.last_index() + 1 {
                return Err(RaftError::Storage(format!("non contiguous append at {} (last {})",
                                                      e.index,
                                                      self.last_index())));
            }
            self.log.push(e.clone());
        }
        Ok(())
    }

    fn truncate_from(&mut self, from: LogIndex) -> Result<(), RaftError> {
        self.log.truncate(from.saturating_sub(1) as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::message::EntryPayload;

    fn e(term: Term, index: LogIndex) -> LogEntry {
        LogEntry { term,
                   index,
                   payload: EntryPayload::Noop }
    }

    #[test]
    fn append_truncate_and_lookup() {
        let mut s = MemRaftStorage::new();
        s.append(&[e(1, 1), e(1, 2), e(2, 3)]).unwrap();
        assert_eq!(s.last_index(), 3);
        assert_eq!(s.last_term(), 2);
        assert_eq!(s.term_at(0), Some(0));
        assert_eq!(s.term_at(4), None);
        s.truncate_from(2).unwrap();
        assert_eq!(s.last_index(), 1);
        assert!(s.append(&[e(3, 5)]).is_err());
        assert_eq!(s.entries_from(1, 10).len(), 1);
    }
}
