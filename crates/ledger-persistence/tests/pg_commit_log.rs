mod test_support;

use std::sync::Arc;

use chrono::Utc;
use ledger_domain::{SecureHash, StateRef};
use ledger_notary::{CommitOutcome, CommitRequest, NotaryError, UniquenessProvider};
use ledger_persistence::pg::{PgUniquenessProvider, PoolProvider};
use test_support::TEST_POOL;
use uuid::Uuid;

fn fresh_state() -> StateRef {
    StateRef::new(SecureHash::sha256(Uuid::new_v4().as_bytes()), 0)
}

fn request(tx: &[u8], states: Vec<StateRef>) -> CommitRequest {
    CommitRequest { states,
                    tx_id: SecureHash::sha256(tx),
                    requester: "Alice".into(),
                    requested_at: Utc::now() }
}

#[tokio::test]
async fn commit_is_all_or_nothing_and_idempotent() {
    let Some(pool) = TEST_POOL.as_ref() else {
        eprintln!("DATABASE_URL not set - skipping");
        return;
    };
    let provider = PgUniquenessProvider::new(PoolProvider { pool: pool.clone() });
    let (a, b) = (fresh_state(), fresh_state());
    let tx_a = Uuid::new_v4();
    let first = request(tx_a.as_bytes(), vec![a, b]);

    assert_eq!(provider.commit(first.clone()).await.unwrap(), CommitOutcome::Committed);
    assert_eq!(provider.commit(first.clone()).await.unwrap(), CommitOutcome::AlreadyCommitted);

    let c = fresh_state();
    let rival = request(Uuid::new_v4().as_bytes(), vec![c, b]);
    assert_eq!(provider.commit(rival).await,
               Err(NotaryError::Conflict { state_ref: b,
                                           consuming_tx: first.tx_id }));
    assert!(provider.consumer_of(&c).await.unwrap().is_none());

    let entry = provider.consumer_of(&b).await.unwrap().unwrap();
    assert_eq!(entry.consuming_tx, first.tx_id);
    assert_eq!(entry.input_index, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_admit_one_consumer() {
    let Some(pool) = TEST_POOL.as_ref() else {
        eprintln!("DATABASE_URL not set - skipping");
        return;
    };
    let provider = Arc::new(PgUniquenessProvider::new(PoolProvider { pool: pool.clone() }));
    let state = fresh_state();
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let provider = provider.clone();
        tasks.push(tokio::spawn(async move {
            provider.commit(request(Uuid::new_v4().as_bytes(), vec![state])).await
        }));
    }
    let mut won = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(CommitOutcome::Committed) => won += 1,
            Ok(other) => panic!("unexpected {other:?}"),
            Err(NotaryError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected {e}"),
        }
    }
    assert_eq!(won, 1);
}
