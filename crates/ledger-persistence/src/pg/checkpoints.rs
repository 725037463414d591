use chrono::{DateTime, Utc};
use diesel::prelude::*;
use ledger_core::{Checkpoint, CheckpointError, CheckpointStore, FlowId};
use log::debug;
use serde_json::Value;

use crate::error::PersistenceError;
use crate::pg::{with_retry, ConnectionProvider};
use crate::schema::flow_checkpoints;

/// Fila de `flow_checkpoints`. `record` guarda el checkpoint completo como
/// JSONB; las demás columnas son copias para consultas y restricciones.
#[derive(Queryable, Insertable, AsChangeset, Debug)]
#[diesel(table_name = flow_checkpoints, primary_key(flow_id))]
pub struct CheckpointRow {
    pub flow_id: uuid::Uuid,
    pub logic_type: String,
    pub status: String,
    pub record: Value,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRow {
    fn from_checkpoint(cp: &Checkpoint) -> Result<Self, CheckpointError> {
        let record = serde_json::to_value(cp).map_err(|e| CheckpointError::Backend(e.to_string()))?;
        Ok(Self { flow_id: cp.flow_id,
                  logic_type: cp.logic_type.clone(),
                  status: cp.status.as_str().to_string(),
                  record,
                  checksum: cp.checksum.clone(),
                  created_at: cp.created_at,
                  updated_at: cp.updated_at })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, CheckpointError> {
        let cp = Checkpoint::decode(self.flow_id, &self.record.to_string())?;
        if cp.checksum != self.checksum || cp.flow_id != self.flow_id {
            return Err(CheckpointError::Corrupted { flow_id: self.flow_id,
                                                    reason: "row columns disagree with record".into() });
        }
        Ok(cp)
    }
}

/// `CheckpointStore` sobre Postgres.
pub struct PgCheckpointStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgCheckpointStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> CheckpointStore for PgCheckpointStore<P> {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let row = CheckpointRow::from_checkpoint(checkpoint)?;
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(flow_checkpoints::table).values(&row)
                                                        .on_conflict(flow_checkpoints::flow_id)
                                                        .do_update()
                                                        .set(&row)
                                                        .execute(&mut conn)
                                                        .map_err(PersistenceError::from)
        })?;
        debug!("checkpoint.put:pg flow_id={} status={}", row.flow_id, row.status);
        Ok(())
    }

    fn get(&self, flow_id: FlowId) -> Result<Option<Checkpoint>, CheckpointError> {
        let row: Option<CheckpointRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            flow_checkpoints::table.find(flow_id)
                                   .first::<CheckpointRow>(&mut conn)
                                   .optional()
                                   .map_err(PersistenceError::from)
        })?;
        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    fn delete(&self, flow_id: FlowId) -> Result<(), CheckpointError> {
        let removed = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::delete(flow_checkpoints::table.find(flow_id)).execute(&mut conn)
                                                                 .map_err(PersistenceError::from)
        })?;
        debug!("checkpoint.delete:pg flow_id={flow_id} removed={removed}");
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<FlowId>, CheckpointError> {
        let ids = with_retry(|| {
            let mut conn = self.provider.connection()?;
            flow_checkpoints::table.select(flow_checkpoints::flow_id)
                                   .order(flow_checkpoints::created_at.asc())
                                   .load::<uuid::Uuid>(&mut conn)
                                   .map_err(PersistenceError::from)
        })?;
        Ok(ids)
    }
}
