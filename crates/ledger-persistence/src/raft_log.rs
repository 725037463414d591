//! Storage Raft en disco para las réplicas del notario replicado.
//!
//! Por réplica, un directorio con `hard_state.json` (reescrito entero:
//! tmp, sync, rename) y `log.jsonl` (una entrada por línea, sólo se añade
//! al final salvo al truncar). Cada escritura se sincroniza antes de volver.
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledger_notary::raft::{HardState, LogEntry, LogIndex, NodeId, RaftError, RaftStorage, StorageOpener, Term};

const HARD_STATE_FILE: &str = "hard_state.json";
const LOG_FILE: &str = "log.jsonl";

fn storage_err(op: &str, e: impl std::fmt::Display) -> RaftError {
    RaftError::Storage(format!("{op}: {e}"))
}

fn write_synced(target: &Path, raw: &[u8]) -> Result<(), RaftError> {
    let tmp = target.with_extension("tmp");
    {
        let mut f = File::create(&tmp).map_err(|e| storage_err("create tmp", e))?;
        f.write_all(raw).map_err(|e| storage_err("write tmp", e))?;
        f.sync_all().map_err(|e| storage_err("sync tmp", e))?;
    }
    fs::rename(&tmp, target).map_err(|e| storage_err("rename", e))
}

fn encode_lines(entries: &[LogEntry]) -> Result<String, RaftError> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry).map_err(|e| storage_err("encode entry", e))?);
        out.push('\n');
    }
    Ok(out)
}

pub struct FileRaftStorage {
    dir: PathBuf,
    hard: HardState,
    log: Vec<LogEntry>,
}

impl FileRaftStorage {
    /// Abre el directorio, creándolo si no existe, y carga lo persistido.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RaftError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| storage_err("create dir", e))?;
        let hard = match fs::read_to_string(dir.join(HARD_STATE_FILE)) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| storage_err("decode hard state", e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => HardState::default(),
            Err(e) => return Err(storage_err("read hard state", e)),
        };
        let mut storage = Self { dir,
                                 hard,
                                 log: Vec::new() };
        storage.load_log()?;
        log::info!("raft.storage:open dir={} term={} voted_for={:?} entries={}",
                   storage.dir.display(),
                   storage.hard.term,
                   storage.hard.voted_for,
                   storage.log.len());
        Ok(storage)
    }

    /// Opener para `RaftCluster::start_with`: la réplica `id` vive en
    /// `<root>/replica-<id>`.
    pub fn opener(root: impl AsRef<Path>) -> StorageOpener {
        let root = root.as_ref().to_path_buf();
        Arc::new(move |id: NodeId| -> Result<Box<dyn RaftStorage>, RaftError> {
            Ok(Box::new(FileRaftStorage::open(root.join(format!("replica-{id}")))?))
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_log(&mut self) -> Result<(), RaftError> {
        let raw = match fs::read_to_string(self.dir.join(LOG_FILE)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(storage_err("read log", e)),
        };
        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut torn = false;
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) if entry.index == self.log.len() as LogIndex + 1 => self.log.push(entry),
                Ok(entry) => {
                    return Err(RaftError::Storage(format!("log out of order at index {} (expected {})",
                                                          entry.index,
                                                          self.log.len() + 1)))
                }
                // Sólo la última línea puede quedar a medias tras una caída.
                Err(e) if i + 1 == lines.len() => {
                    log::warn!("raft.storage:torn_tail dir={} error={e}", self.dir.display());
                    torn = true;
                }
                Err(e) => return Err(storage_err("decode log", e)),
            }
        }
        if torn {
            write_synced(&self.dir.join(LOG_FILE), encode_lines(&self.log)?.as_bytes())?;
        }
        Ok(())
    }
}

impl RaftStorage for FileRaftStorage {
    fn hard_state(&self) -> HardState {
        self.hard
    }

    fn save_hard_state(&mut self, state: HardState) -> Result<(), RaftError> {
        if state == self.hard {
            return Ok(());
        }
        let raw = serde_json::to_vec(&state).map_err(|e| storage_err("encode hard state", e))?;
        write_synced(&self.dir.join(HARD_STATE_FILE), &raw)?;
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
        for (offset, e) in entries.iter().enumerate() {
            let expected = self.last_index() + 1 + offset as LogIndex;
            if e.index != expected {
                return Err(RaftError::Storage(format!("non contiguous append at {} (expected {expected})",
                                                      e.index)));
            }
        }
        if entries.is_empty() {
            return Ok(());
        }
        let raw = encode_lines(entries)?;
        let mut f = OpenOptions::new().create(true)
                                      .append(true)
                                      .open(self.dir.join(LOG_FILE))
                                      .map_err(|e| storage_err("open log", e))?;
        f.write_all(raw.as_bytes()).map_err(|e| storage_err("append log", e))?;
        f.sync_all().map_err(|e| storage_err("sync log", e))?;
        self.log.extend_from_slice(entries);
        Ok(())
    }

    fn truncate_from(&mut self, from: LogIndex) -> Result<(), RaftError> {
        let keep = from.saturating_sub(1) as usize;
        if keep >= self.log.len() {
            return Ok(());
        }
        write_synced(&self.dir.join(LOG_FILE), encode_lines(&self.log[..keep])?.as_bytes())?;
        self.log.truncate(keep);
        log::debug!("raft.storage:truncate dir={} from={from}", self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ledger_notary::raft::EntryPayload;

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ledger-raft-{}", uuid::Uuid::new_v4()))
    }

    fn e(term: Term, index: LogIndex) -> LogEntry {
        LogEntry { term,
                   index,
                   payload: EntryPayload::Noop }
    }

    #[test]
    fn reopen_restores_hard_state_and_log() {
        let dir = temp_dir();
        {
            let mut s = FileRaftStorage::open(&dir).unwrap();
            s.save_hard_state(HardState { term: 4,
                                          voted_for: Some(2) })
             .unwrap();
            s.append(&[e(1, 1), e(2, 2), e(4, 3)]).unwrap();
            s.truncate_from(3).unwrap();
            s.append(&[e(4, 3), e(4, 4)]).unwrap();
        }
        let s = FileRaftStorage::open(&dir).unwrap();
        assert_eq!(s.hard_state(),
                   HardState { term: 4,
                               voted_for: Some(2) });
        assert_eq!(s.last_index(), 4);
        assert_eq!(s.term_at(2), Some(2));
        assert_eq!(s.entries_from(3, 10), vec![e(4, 3), e(4, 4)]);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn torn_last_line_is_dropped_on_open() {
        let dir = temp_dir();
        {
            let mut s = FileRaftStorage::open(&dir).unwrap();
            s.append(&[e(1, 1), e(1, 2)]).unwrap();
        }
        let mut f = OpenOptions::new().append(true).open(dir.join(LOG_FILE)).unwrap();
        f.write_all(b"{\"term\":1,\"ind").unwrap();
        drop(f);

        let mut s = FileRaftStorage::open(&dir).unwrap();
        assert_eq!(s.last_index(), 2);
        s.append(&[e(2, 3)]).unwrap();
        let s = FileRaftStorage::open(&dir).unwrap();
        assert_eq!(s.last_term(), 2);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn rejects_gaps_without_touching_disk() {
        let dir = temp_dir();
        let mut s = FileRaftStorage::open(&dir).unwrap();
        s.append(&[e(1, 1)]).unwrap();
        assert!(s.append(&[e(1, 2), e(1, 4)]).is_err());
        let s = FileRaftStorage::open(&dir).unwrap();
        assert_eq!(s.last_index(), 1);
        fs::remove_dir_all(dir).ok();
    }
}
