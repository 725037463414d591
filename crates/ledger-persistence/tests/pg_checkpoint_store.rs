mod test_support;

use chrono::Utc;
use ledger_core::{Checkpoint, CheckpointError, CheckpointStore, FlowStatus, WaitRecord};
use ledger_persistence::pg::{PgCheckpointStore, PoolProvider};
use test_support::with_pool;
use uuid::Uuid;

fn checkpoint(status: FlowStatus) -> Checkpoint {
    let now = Utc::now();
    let mut cp = Checkpoint { flow_id: Uuid::new_v4(),
                              logic_type: "test.ping".into(),
                              status,
                              continuation: "{\"Start\":{\"value\":1}}".into(),
                              sessions: vec![],
                              wait: Some(WaitRecord::Start),
                              progress_step: None,
                              error: None,
                              created_at: now,
                              updated_at: now,
                              checksum: String::new() };
    cp.seal();
    cp
}

#[test]
fn put_replaces_and_delete_is_idempotent() {
    let ran = with_pool(|pool| {
        let store = PgCheckpointStore::new(PoolProvider { pool: pool.clone() });
        let mut cp = checkpoint(FlowStatus::Runnable);
        store.put(&cp).unwrap();

        cp.status = FlowStatus::Suspended;
        cp.continuation = "{\"Waiting\":{\"value\":1}}".into();
        cp.updated_at = Utc::now();
        cp.seal();
        store.put(&cp).unwrap();

        let loaded = store.get(cp.flow_id).unwrap().expect("checkpoint row");
        assert_eq!(loaded.status, FlowStatus::Suspended);
        assert_eq!(loaded.continuation, cp.continuation);
        assert!(store.list_ids().unwrap().contains(&cp.flow_id));

        store.delete(cp.flow_id).unwrap();
        store.delete(cp.flow_id).unwrap();
        assert!(store.get(cp.flow_id).unwrap().is_none());
    });
    if ran.is_none() {
        eprintln!("DATABASE_URL not set - skipping");
    }
}

#[test]
fn tampered_record_is_reported_as_corrupted() {
    use diesel::prelude::*;
    use ledger_persistence::schema::flow_checkpoints;

    let ran = with_pool(|pool| {
        let store = PgCheckpointStore::new(PoolProvider { pool: pool.clone() });
        let cp = checkpoint(FlowStatus::Suspended);
        store.put(&cp).unwrap();

        let mut conn = pool.get().unwrap();
        diesel::update(flow_checkpoints::table.find(cp.flow_id)).set(flow_checkpoints::checksum.eq("0".repeat(64)))
                                                                .execute(&mut conn)
                                                                .unwrap();

        assert!(matches!(store.get(cp.flow_id), Err(CheckpointError::Corrupted { .. })));
        let scanned = store.scan().unwrap();
        assert!(scanned.iter().any(|(id, r)| *id == cp.flow_id && r.is_err()));
        store.delete(cp.flow_id).unwrap();
    });
    if ran.is_none() {
        eprintln!("DATABASE_URL not set - skipping");
    }
}
