use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ledger_domain::{KeyPair, Party, SecureHash, StateRef};
use ledger_notary::{CommitOutcome, CommitRequest, InMemoryUniquenessProvider, NotarisationRequest, NotaryError,
                    NotaryService, RaftCluster, RaftConfig, UniquenessProvider};

fn input(n: u8) -> StateRef {
    StateRef::new(SecureHash::sha256(&[n]), 0)
}

fn request(tx: &str, inputs: Vec<StateRef>) -> NotarisationRequest {
    let key = KeyPair::from_name("Alice");
    NotarisationRequest::new(SecureHash::sha256(tx.as_bytes()),
                             inputs,
                             None,
                             Party::new("Alice", key.public()),
                             &key)
}

fn service(provider: Arc<dyn UniquenessProvider>) -> Arc<NotaryService> {
    let key = KeyPair::from_name("Notary");
    Arc::new(NotaryService::new(Party::new("Notary", key.public()), key, provider))
}

fn test_config() -> RaftConfig {
    RaftConfig { max_attempts: 60,
                 ..RaftConfig::default() }
}

async fn race(notary: Arc<NotaryService>, contenders: usize) -> (Vec<SecureHash>, Vec<NotaryError>) {
    let mut tasks = Vec::new();
    for i in 0..contenders {
        let notary = notary.clone();
        tasks.push(tokio::spawn(async move {
            let req = request(&format!("tx-{i}"), vec![input(1), input(2)]);
            (req.tx_id, notary.notarise(&req, Utc::now()).await)
        }));
    }
    let mut won = Vec::new();
    let mut lost = Vec::new();
    for t in tasks {
        let (tx, result) = t.await.unwrap();
        match result {
            Ok(_) => won.push(tx),
            Err(e) => lost.push(e),
        }
    }
    (won, lost)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_node_admits_exactly_one_consumer() {
    let notary = service(Arc::new(InMemoryUniquenessProvider::new()));
    let (won, lost) = race(notary, 8).await;
    assert_eq!(won.len(), 1);
    assert_eq!(lost.len(), 7);
    for e in lost {
        match e {
            NotaryError::Conflict { consuming_tx, .. } => assert_eq!(consuming_tx, won[0]),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replicated_notary_admits_exactly_one_consumer_on_every_replica() {
    let cluster = RaftCluster::start(3, test_config());
    cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader elected");
    let notary = service(Arc::new(cluster.provider()));

    let (won, lost) = race(notary, 5).await;
    assert_eq!(won.len(), 1);
    assert!(lost.iter().all(|e| matches!(e, NotaryError::Conflict { consuming_tx, .. } if *consuming_tx == won[0])));

    tokio::time::sleep(Duration::from_millis(300)).await;
    for id in 1..=3 {
        let entry = cluster.consumer_on(id, input(2)).await.expect("replica missing the commit");
        assert_eq!(entry.consuming_tx, won[0]);
        assert_eq!(entry.input_index, 1);
    }
}

#[tokio::test]
async fn resubmission_returns_same_signature_and_keeps_log() {
    let cluster = RaftCluster::start(3, test_config());
    cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader elected");
    let provider = Arc::new(cluster.provider());
    let notary = service(provider.clone());

    let req = request("tx-once", vec![input(7)]);
    let first = notary.notarise(&req, Utc::now()).await.unwrap();
    let entry = provider.consumer_of(&input(7)).await.unwrap().unwrap();

    let second = notary.notarise(&req, Utc::now() + chrono::Duration::seconds(3)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provider.consumer_of(&input(7)).await.unwrap().unwrap(), entry);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_survives_leader_isolation() {
    let cluster = RaftCluster::start(3, test_config());
    let old = cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader elected");
    let provider = cluster.provider();

    cluster.network().isolate(old);
    let request = CommitRequest { states: vec![input(9)],
                                  tx_id: SecureHash::sha256(b"after-failover"),
                                  requester: "Alice".into(),
                                  requested_at: Utc::now() };
    let outcome = provider.commit(request.clone()).await.unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed | CommitOutcome::AlreadyCommitted));

    let new = cluster.leader().expect("leader after failover");
    assert_ne!(new, old);

    cluster.network().heal(old);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let entry = cluster.consumer_on(old, input(9)).await.expect("old leader did not catch up");
    assert_eq!(entry.consuming_tx, request.tx_id);
    assert_eq!(provider.commit(request).await.unwrap(), CommitOutcome::AlreadyCommitted);
}

#[tokio::test]
async fn conflicting_request_is_not_retried() {
    let cluster = RaftCluster::start(1, test_config());
    cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader elected");
    let provider = cluster.provider();
    let first = CommitRequest { states: vec![input(3)],
                                tx_id: SecureHash::sha256(b"a"),
                                requester: "Alice".into(),
                                requested_at: Utc::now() };
    let second = CommitRequest { tx_id: SecureHash::sha256(b"b"),
                                 ..first.clone() };
    provider.commit(first.clone()).await.unwrap();
    assert_eq!(provider.commit(second).await,
               Err(NotaryError::Conflict { state_ref: input(3),
                                           consuming_tx: first.tx_id }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restarted_follower_rebuilds_commit_log_from_leader() {
    let mut cluster = RaftCluster::start(3, test_config());
    let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.expect("no leader elected");
    let provider = cluster.provider();
    let request = CommitRequest { states: vec![input(11)],
                                  tx_id: SecureHash::sha256(b"before-restart"),
                                  requester: "Alice".into(),
                                  requested_at: Utc::now() };
    provider.commit(request.clone()).await.unwrap();

    let follower = (1..=3).find(|id| *id != leader).unwrap();
    cluster.restart_replica(follower).await.unwrap();

    let entry = tokio::time::timeout(Duration::from_secs(5), async {
                    loop {
                        if let Some(entry) = cluster.consumer_on(follower, input(11)).await {
                            return entry;
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                })
                .await
                .expect("restarted follower never caught up");
    assert_eq!(entry.consuming_tx, request.tx_id);
    assert_eq!(provider.commit(request).await.unwrap(), CommitOutcome::AlreadyCommitted);
}
