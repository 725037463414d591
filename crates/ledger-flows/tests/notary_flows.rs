mod common;

use common::{eventually, party, TestNetwork, NOTARY};
use ledger_core::FlowError;
use ledger_domain::{CashCommand, Command, KeyPair, SignedTransaction, StateAndRef, TransactionBuilder, TransactionState};
use ledger_flows::{CashIssueFlow, IssueRequest, TxResult};

/// Gasta `coin` completo a favor de `to`, firmado por Alice.
fn spend_to(coin: &StateAndRef, to: &str) -> SignedTransaction {
    let alice = KeyPair::from_name("Alice");
    let mut b = TransactionBuilder::new(None);
    b.add_input_state(coin.clone())
     .add_output_state(TransactionState { data: coin.state.data.with_owner(party(to).owning_key),
                                          notary: coin.state.notary.clone() })
     .add_command(Command::new(CashCommand::Move, [alice.public()]));
    b.sign_with(&[&alice]).unwrap()
}

async fn alice_coin(network: &TestNetwork) -> (common::TestNode, StateAndRef) {
    let bank = network.node("Bank").await;
    let alice = network.node("Alice").await;
    let issue = CashIssueFlow::new(IssueRequest { amount: 100,
                                                  currency: "USD".into(),
                                                  recipient: "Alice".into(),
                                                  issuer_ref: ledger_domain::OpaqueBytes(vec![1]) });
    bank.engine.start_typed(issue).unwrap().result.wait().await.unwrap();
    eventually("alice holds the issuance", || alice.balance() == 100).await;
    let coin = alice.services.vault().unconsumed().remove(0);
    (alice, coin)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn double_spend_from_two_nodes_admits_one() {
    let network = TestNetwork::new();
    let _notary = network.node(NOTARY).await;
    let (alice, coin) = alice_coin(&network).await;
    let bob = network.node("Bob").await;

    let to_bob = spend_to(&coin, "Bob");
    let to_bank = spend_to(&coin, "Bank");
    let first = alice.engine
                     .start_flow("notary.notarise", serde_json::to_value(&to_bob).unwrap())
                     .unwrap();
    let second = bob.engine
                    .start_flow("notary.notarise", serde_json::to_value(&to_bank).unwrap())
                    .unwrap();
    let (a, b) = tokio::join!(first.result.wait_as::<TxResult>(), second.result.wait_as::<TxResult>());

    let (winner, loser) = match (a, b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        other => panic!("expected exactly one notarisation, got {other:?}"),
    };
    assert_eq!(loser,
               FlowError::NotaryConflict { state_ref: coin.reference.to_string(),
                                           consuming_tx: winner.tx_id.to_hex() });
    let notary_key = party(NOTARY).owning_key;
    assert!(winner.transaction.sigs.iter().any(|s| s.by == notary_key));
}

#[tokio::test]
async fn resubmitted_transaction_gets_the_same_signature() {
    let network = TestNetwork::new();
    let _notary = network.node(NOTARY).await;
    let (alice, coin) = alice_coin(&network).await;

    let stx = spend_to(&coin, "Bob");
    let mut signatures = Vec::new();
    for _ in 0..2 {
        let result: TxResult = alice.engine
                                    .start_flow("notary.notarise", serde_json::to_value(&stx).unwrap())
                                    .unwrap()
                                    .result
                                    .wait_as()
                                    .await
                                    .unwrap();
        signatures.push(result.transaction.sigs.last().cloned().unwrap());
    }
    assert_eq!(signatures[0], signatures[1]);
}

#[tokio::test]
async fn transaction_without_notary_is_rejected_at_start() {
    let network = TestNetwork::new();
    let alice = network.node("Alice").await;
    let mut b = TransactionBuilder::new(None);
    let key = KeyPair::from_name("Alice");
    b.add_command(Command::new(CashCommand::Move, [key.public()]));
    let stx = b.sign_with(&[&key]).unwrap();

    let err = alice.engine
                   .start_flow("notary.notarise", serde_json::to_value(&stx).unwrap())
                   .err()
                   .unwrap();
    assert!(matches!(err, FlowError::UnexpectedInput(_)));
}

#[tokio::test]
async fn node_without_notary_service_rejects_requests() {
    let network = TestNetwork::new();
    let (alice, coin) = alice_coin(&network).await;
    // Un nodo "Notary" sin servicio de notario.
    let services = std::sync::Arc::new(ledger_flows::NodeServices::new(NOTARY,
                                                                       KeyPair::from_name(NOTARY),
                                                                       network.map.clone()));
    let store = std::sync::Arc::new(ledger_core::InMemoryCheckpointStore::new());
    let engine = network.engine(services, store, common::config());
    engine.start().await.unwrap();

    let err = alice.engine
                   .start_flow("notary.notarise", serde_json::to_value(spend_to(&coin, "Bob")).unwrap())
                   .unwrap()
                   .result
                   .wait()
                   .await
                   .unwrap_err();
    assert!(matches!(err, FlowError::NotaryRejected(_)));
}
