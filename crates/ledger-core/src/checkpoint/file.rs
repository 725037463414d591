//! Store de checkpoints en disco: un archivo JSON por flow.
//!
//! Escritura atómica: se escribe `<id>.json.tmp`, se sincroniza y se renombra
//! sobre `<id>.json`.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::errors::CheckpointError;
use crate::FlowId;

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, flow_id: FlowId) -> PathBuf {
        self.dir.join(format!("{flow_id}.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let raw = checkpoint.encode()?;
        let target = self.path_for(checkpoint.flow_id);
        let tmp = target.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(raw.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        log::debug!("checkpoint.put:file flow_id={} status={}",
                    checkpoint.flow_id,
                    checkpoint.status.as_str());
        Ok(())
    }

    fn get(&self, flow_id: FlowId) -> Result<Option<Checkpoint>, CheckpointError> {
        match fs::read_to_string(self.path_for(flow_id)) {
            Ok(raw) => Checkpoint::decode(flow_id, &raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, flow_id: FlowId) -> Result<(), CheckpointError> {
        match fs::remove_file(self.path_for(flow_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_ids(&self) -> Result<Vec<FlowId>, CheckpointError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path.file_stem()
                                  .and_then(|s| s.to_str())
                                  .and_then(|s| FlowId::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::sample;

    fn temp_store() -> FileCheckpointStore {
        let dir = std::env::temp_dir().join(format!("ledger-core-cp-{}", uuid::Uuid::new_v4()));
        FileCheckpointStore::open(dir).unwrap()
    }

    #[test]
    fn roundtrip_and_listing() {
        let store = temp_store();
        let id = FlowId::new_v4();
        let cp = sample(id);
        store.put(&cp).unwrap();
        assert_eq!(store.list_ids().unwrap(), vec![id]);
        assert_eq!(store.get(id).unwrap(), Some(cp));
        assert!(!store.path_for(id).with_extension("json.tmp").exists());
        store.delete(id).unwrap();
        assert!(store.list_ids().unwrap().is_empty());
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn truncated_file_is_corrupted() {
        let store = temp_store();
        let id = FlowId::new_v4();
        fs::write(store.path_for(id), "{\"flow_id\":").unwrap();
        assert!(matches!(store.get(id), Err(CheckpointError::Corrupted { .. })));
        let _ = fs::remove_dir_all(store.dir());
    }
}
