use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use ledger_domain::{SecureHash, StateRef};
use ledger_notary::{CommitOutcome, CommitRequest, NotaryError, RaftCluster, RaftConfig, UniquenessProvider};
use ledger_persistence::FileRaftStorage;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("ledger-raft-cluster-{}", uuid::Uuid::new_v4()))
}

fn spend(tx: &str, state: StateRef) -> CommitRequest {
    CommitRequest { states: vec![state],
                    tx_id: SecureHash::sha256(tx.as_bytes()),
                    requester: "Alice".into(),
                    requested_at: Utc::now() }
}

fn test_config() -> RaftConfig {
    RaftConfig { max_attempts: 60,
                 ..RaftConfig::default() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn committed_spend_survives_restart_of_a_majority() {
    let dir = temp_dir();
    let mut cluster = RaftCluster::start_with(3, test_config(), FileRaftStorage::opener(&dir)).unwrap();
    cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader elected");
    let provider = cluster.provider();

    let coin = StateRef::new(SecureHash::sha256(b"coin"), 0);
    let first = spend("first-spend", coin);
    assert_eq!(provider.commit(first.clone()).await.unwrap(), CommitOutcome::Committed);

    // Réplica 3 queda fuera: la mayoría que decide es la que reinicia.
    cluster.network().isolate(3);
    cluster.restart_replica(1).await.unwrap();
    cluster.restart_replica(2).await.unwrap();
    cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader after restart");

    match provider.commit(spend("double-spend", coin)).await {
        Err(NotaryError::Conflict { consuming_tx, .. }) => assert_eq!(consuming_tx, first.tx_id),
        other => panic!("double spend admitted after restart: {other:?}"),
    }
    assert_eq!(provider.commit(first.clone()).await.unwrap(), CommitOutcome::AlreadyCommitted);

    cluster.shutdown();
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restarted_replica_keeps_its_term_and_vote() {
    let dir = temp_dir();
    let mut cluster = RaftCluster::start_with(3, test_config(), FileRaftStorage::opener(&dir)).unwrap();
    let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader elected");
    let term = cluster.statuses().into_iter().find(|s| s.id == leader).unwrap().term;

    cluster.restart_replica(leader).await.unwrap();
    let status = cluster.statuses().into_iter().find(|s| s.id == leader).unwrap();
    assert!(status.term >= term);

    cluster.shutdown();
    let _ = std::fs::remove_dir_all(dir);
}
