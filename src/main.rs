//! Demo en un proceso: un notario, un banco emisor y dos partes.
//!
//! `LEDGER_NOTARY_MODE=raft` usa un notario replicado; `LEDGER_DATA_DIR`
//! guarda en disco los checkpoints y el log de cada réplica. `RUST_LOG=info` muestra el recorrido.
use std::time::Duration;

use ledgerflow::{AppError, CheckpointBackend, LocalNetwork, Node, NodeConfig};

const USD: &str = "USD";
const SETTLE: Duration = Duration::from_secs(5);

fn participant(base: &NodeConfig, name: &str) -> NodeConfig {
    let checkpoints = match &base.checkpoints {
        CheckpointBackend::Postgres => {
            log::warn!("demo:checkpoints postgres is shared by every node, {name} keeps them in memory");
            CheckpointBackend::Memory
        }
        other => other.clone(),
    };
    NodeConfig::named(name).with_checkpoints(checkpoints)
                           .with_notary(base.notary)
                           .with_engine(base.engine.clone())
}

fn report(nodes: &[&Node]) {
    for node in nodes {
        println!("{:<6} {:>5} {USD}  flows={}", node.name(), node.balance(USD), node.flows().len());
    }
}

async fn run() -> Result<(), AppError> {
    let base = NodeConfig::from_env()?;
    let network = LocalNetwork::new();
    let notary = network.start_notary(participant(&base, "Notary")).await?;
    let bank = network.start_node(participant(&base, "Bank")).await?;
    let alice = network.start_node(participant(&base, "Alice")).await?;
    let bob = network.start_node(participant(&base, "Bob")).await?;
    log::info!("demo:start notary={:?}", base.notary);

    let issued = bank.issue(1_000, USD, "Alice").await?;
    println!("issued 1000 {USD} to Alice in tx {}", issued.tx_id.short());
    alice.await_balance(USD, 1_000, SETTLE).await?;

    let paid = alice.pay(300, USD, "Bob").await?;
    println!("Alice paid Bob 300 {USD} in tx {}", paid.tx_id.short());
    bob.await_balance(USD, 300, SETTLE).await?;

    let back = bob.pay(100, USD, "Alice").await?;
    println!("Bob paid Alice 100 {USD} in tx {}", back.tx_id.short());
    alice.await_balance(USD, 800, SETTLE).await?;

    match bob.pay(1_000, USD, "Alice").await {
        Err(AppError::Flow(e)) => println!("Bob cannot pay 1000 {USD}: {e}"),
        Err(e) => return Err(e),
        Ok(tx) => println!("unexpected payment {}", tx.tx_id.short()),
    }

    bank.issue(200, USD, "Bank").await?;
    let exited = bank.exit(50, USD).await?;
    println!("Bank exited 50 {USD} in tx {}", exited.tx_id.short());

    report(&[&bank, &alice, &bob, &notary]);
    for node in [&notary, &bank, &alice, &bob] {
        node.shutdown();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                             .init();
    if let Err(e) = run().await {
        log::error!("demo:failed error={e}");
        eprintln!("[ledgerflow] {e}");
        std::process::exit(1);
    }
}
