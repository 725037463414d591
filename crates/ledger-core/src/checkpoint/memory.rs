use std::collections::HashMap;
use std::sync::RwLock;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::errors::CheckpointError;
use crate::FlowId;

/// Store en memoria. Guarda el registro serializado completo para que un
/// lector nunca vea un checkpoint parcial y para ejercitar el mismo
/// camino de (de)serialización que las stores durables.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    records: RwLock<HashMap<FlowId, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta un registro crudo (tests de corrupción).
    #[doc(hidden)]
    pub fn insert_raw(&self, flow_id: FlowId, raw: impl Into<String>) {
        if let Ok(mut map) = self.records.write() {
            map.insert(flow_id, raw.into());
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CheckpointError {
    CheckpointError::Backend("checkpoint store lock poisoned".into())
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let raw = checkpoint.encode()?;
        self.records.write().map_err(poisoned)?.insert(checkpoint.flow_id, raw);
        Ok(())
    }

    fn get(&self, flow_id: FlowId) -> Result<Option<Checkpoint>, CheckpointError> {
        let map = self.records.read().map_err(poisoned)?;
        map.get(&flow_id).map(|raw| Checkpoint::decode(flow_id, raw)).transpose()
    }

    fn delete(&self, flow_id: FlowId) -> Result<(), CheckpointError> {
        self.records.write().map_err(poisoned)?.remove(&flow_id);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<FlowId>, CheckpointError> {
        Ok(self.records.read().map_err(poisoned)?.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::sample;

    #[test]
    fn put_get_delete() {
        let store = InMemoryCheckpointStore::new();
        let id = FlowId::new_v4();
        let cp = sample(id);
        store.put(&cp).unwrap();
        assert_eq!(store.get(id).unwrap(), Some(cp));
        store.delete(id).unwrap();
        assert_eq!(store.get(id).unwrap(), None);
        store.delete(id).unwrap();
    }

    #[test]
    fn scan_reports_corrupted_records_individually() {
        let store = InMemoryCheckpointStore::new();
        let good = FlowId::new_v4();
        let bad = FlowId::new_v4();
        store.put(&sample(good)).unwrap();
        store.insert_raw(bad, "garbage");
        let scanned = store.scan().unwrap();
        assert_eq!(scanned.len(), 2);
        for (id, result) in scanned {
            assert_eq!(result.is_ok(), id == good);
        }
    }
}
