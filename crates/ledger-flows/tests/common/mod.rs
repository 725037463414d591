#![allow(dead_code)]
use std::sync::Arc;
use std::time::Duration;

use ledger_core::{CheckpointStore, EngineConfig, FlowEngine, InMemoryCheckpointStore, InMemoryNetwork, PeerId};
use ledger_domain::{Currency, KeyPair, Party};
use ledger_flows::{register_flows, InMemoryNetworkMap, NodeServices};
use ledger_notary::{InMemoryUniquenessProvider, NotaryService};

pub const NOTARY: &str = "Notary";

pub struct TestNode {
    pub services: Arc<NodeServices>,
    pub engine: FlowEngine<NodeServices>,
    pub store: Arc<InMemoryCheckpointStore>,
}

impl TestNode {
    pub fn balance(&self) -> u64 {
        self.services.vault().balance(&Currency::new("USD"))
    }
}

pub fn config() -> EngineConfig {
    EngineConfig { receive_timeout: Duration::from_secs(5),
                   notary_retries: 3,
                   ..EngineConfig::default() }
}

pub fn party(name: &str) -> Party {
    Party::new(name, KeyPair::from_name(name).public())
}

pub struct TestNetwork {
    pub net: InMemoryNetwork,
    pub map: Arc<InMemoryNetworkMap>,
}

impl TestNetwork {
    pub fn new() -> Self {
        let map = Arc::new(InMemoryNetworkMap::new());
        map.register_notary(party(NOTARY));
        for name in ["Bank", "Alice", "Bob"] {
            map.register(party(name));
        }
        Self { net: InMemoryNetwork::new(),
               map }
    }

    pub fn services(&self, name: &str) -> Arc<NodeServices> {
        let key = KeyPair::from_name(name);
        let services = NodeServices::new(name, key.clone(), self.map.clone());
        if name == NOTARY {
            let notary = NotaryService::new(party(name), key, Arc::new(InMemoryUniquenessProvider::new()));
            Arc::new(services.with_notary(Arc::new(notary)))
        } else {
            Arc::new(services)
        }
    }

    pub fn engine(&self,
                  services: Arc<NodeServices>,
                  store: Arc<InMemoryCheckpointStore>,
                  config: EngineConfig)
                  -> FlowEngine<NodeServices> {
        let name = services.identity().name.clone();
        let checkpoints: Arc<dyn CheckpointStore> = store;
        register_flows(FlowEngine::builder(services, Arc::new(self.net.endpoint(PeerId::new(name))))).checkpoints(checkpoints)
                                                                                                   .config(config)
                                                                                                   .build()
    }

    pub async fn node(&self, name: &str) -> TestNode {
        self.node_with(name, config()).await
    }

    pub async fn node_with(&self, name: &str, config: EngineConfig) -> TestNode {
        let services = self.services(name);
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = self.engine(services.clone(), store.clone(), config);
        engine.start().await.unwrap();
        TestNode { services,
                   engine,
                   store }
    }
}

pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held: {what}");
}
