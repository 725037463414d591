//! Ensamblado de nodos sobre una red en memoria: servicios, store de
//! checkpoints, notario opcional y engine con los flows registrados.
use std::sync::Arc;
use std::time::Duration;

use ledger_core::{CheckpointStore, FileCheckpointStore, FlowEngine, FlowInfo, InMemoryCheckpointStore, InMemoryNetwork,
                  PeerId};
use ledger_domain::{Currency, KeyPair, OpaqueBytes, Party};
use ledger_flows::{register_flows, CashExitFlow, CashIssueFlow, CashPaymentFlow, ExitRequest, InMemoryNetworkMap,
                   IssueRequest, NodeServices, PaymentRequest, TxResult};
use ledger_notary::{InMemoryUniquenessProvider, NotaryError, NotaryService, RaftCluster, UniquenessProvider};
use ledger_persistence::{build_dev_pool_from_env, FileRaftStorage, PgCheckpointStore, PgUniquenessProvider,
                         PoolProvider};

use crate::config::{CheckpointBackend, NodeConfig, NotaryMode};
use crate::errors::AppError;

const LEADER_TIMEOUT: Duration = Duration::from_secs(5);
const BALANCE_POLL: Duration = Duration::from_millis(10);

/// Red compartida por los nodos de un proceso.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    transport: InMemoryNetwork,
    map: Arc<InMemoryNetworkMap>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> &InMemoryNetwork {
        &self.transport
    }

    pub fn network_map(&self) -> &Arc<InMemoryNetworkMap> {
        &self.map
    }

    pub async fn start_node(&self, config: NodeConfig) -> Result<Node, AppError> {
        self.launch(config, false).await
    }

    /// Arranca un nodo que además presta el servicio de notario según
    /// `config.notary`.
    pub async fn start_notary(&self, config: NodeConfig) -> Result<Node, AppError> {
        self.launch(config, true).await
    }

    async fn launch(&self, config: NodeConfig, notary: bool) -> Result<Node, AppError> {
        let key = KeyPair::from_name(&config.name);
        let party = Party::new(config.name.clone(), key.public());
        let mut services = NodeServices::new(&config.name, key.clone(), self.map.clone());
        let mut cluster = None;
        if notary {
            let provider: Arc<dyn UniquenessProvider> = match config.notary {
                NotaryMode::Single => Arc::new(InMemoryUniquenessProvider::new()),
                NotaryMode::Postgres => Arc::new(PgUniquenessProvider::new(PoolProvider { pool: build_dev_pool_from_env()? })),
                NotaryMode::Raft { cluster_size } => {
                    let c = match &config.checkpoints {
                        // Con directorio de datos las réplicas guardan su log junto a los checkpoints.
                        CheckpointBackend::Dir(dir) => {
                            let root = dir.join(&config.name).join("raft");
                            RaftCluster::start_with(cluster_size, config.raft.clone(), FileRaftStorage::opener(root))?
                        }
                        _ => RaftCluster::start(cluster_size, config.raft.clone()),
                    };
                    c.wait_for_leader(LEADER_TIMEOUT)
                     .await
                     .ok_or_else(|| NotaryError::Unavailable("raft cluster elected no leader".into()))?;
                    let provider = Arc::new(c.provider());
                    cluster = Some(c);
                    provider
                }
            };
            services = services.with_notary(Arc::new(NotaryService::new(party.clone(), key, provider)));
            self.map.register_notary(party);
        } else {
            self.map.register(party);
        }
        let checkpoints = open_checkpoints(&config)?;
        let services = Arc::new(services);
        let engine = build_engine(&self.transport, &config, services.clone(), checkpoints.clone());
        engine.start().await?;
        log::info!("node.start:done name={} notary={notary} mode={:?}", config.name, config.notary);
        Ok(Node { config,
                  services,
                  checkpoints,
                  transport: self.transport.clone(),
                  engine,
                  cluster })
    }
}

fn open_checkpoints(config: &NodeConfig) -> Result<Arc<dyn CheckpointStore>, AppError> {
    Ok(match &config.checkpoints {
        CheckpointBackend::Memory => Arc::new(InMemoryCheckpointStore::new()),
        CheckpointBackend::Dir(dir) => Arc::new(FileCheckpointStore::open(dir.join(&config.name).join("checkpoints"))?),
        // La tabla de checkpoints no distingue nodos: una base por nodo.
        CheckpointBackend::Postgres => {
            Arc::new(PgCheckpointStore::new(PoolProvider { pool: build_dev_pool_from_env()? }))
        }
    })
}

fn build_engine(transport: &InMemoryNetwork,
                config: &NodeConfig,
                services: Arc<NodeServices>,
                checkpoints: Arc<dyn CheckpointStore>)
                -> FlowEngine<NodeServices> {
    let endpoint = Arc::new(transport.endpoint(PeerId::new(config.name.clone())));
    register_flows(FlowEngine::builder(services, endpoint)).checkpoints(checkpoints)
                                                           .config(config.engine.clone())
                                                           .build()
}

/// Nodo en ejecución.
pub struct Node {
    config: NodeConfig,
    services: Arc<NodeServices>,
    checkpoints: Arc<dyn CheckpointStore>,
    transport: InMemoryNetwork,
    engine: FlowEngine<NodeServices>,
    /// Réplicas del notario Raft; se detienen al soltar el nodo.
    cluster: Option<RaftCluster>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn identity(&self) -> &Party {
        self.services.identity()
    }

    pub fn services(&self) -> &Arc<NodeServices> {
        &self.services
    }

    pub fn engine(&self) -> &FlowEngine<NodeServices> {
        &self.engine
    }

    pub fn raft_cluster(&self) -> Option<&RaftCluster> {
        self.cluster.as_ref()
    }

    pub fn balance(&self, currency: &str) -> u64 {
        self.services.vault().balance(&Currency::new(currency))
    }

    pub fn flows(&self) -> Vec<FlowInfo> {
        self.engine.list_flows()
    }

    pub async fn issue(&self, amount: u64, currency: &str, recipient: &str) -> Result<TxResult, AppError> {
        let flow = CashIssueFlow::new(IssueRequest { amount,
                                                     currency: currency.into(),
                                                     recipient: recipient.into(),
                                                     issuer_ref: OpaqueBytes(vec![1]) });
        Ok(self.engine.start_typed(flow)?.result.wait_as().await?)
    }

    pub async fn pay(&self, amount: u64, currency: &str, recipient: &str) -> Result<TxResult, AppError> {
        let flow = CashPaymentFlow::new(PaymentRequest { amount,
                                                         currency: currency.into(),
                                                         recipient: recipient.into() });
        Ok(self.engine.start_typed(flow)?.result.wait_as().await?)
    }

    pub async fn exit(&self, amount: u64, currency: &str) -> Result<TxResult, AppError> {
        let flow = CashExitFlow::new(ExitRequest { amount,
                                                   currency: currency.into(),
                                                   issuer_ref: OpaqueBytes(vec![1]) });
        Ok(self.engine.start_typed(flow)?.result.wait_as().await?)
    }

    /// Espera a que el vault alcance `at_least`; los pagos entrantes se
    /// registran en el flow receptor, no en el del emisor.
    pub async fn await_balance(&self, currency: &str, at_least: u64, timeout: Duration) -> Result<u64, AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let balance = self.balance(currency);
            if balance >= at_least {
                return Ok(balance);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Config(format!("{} holds {balance} {currency}, expected at least {at_least}",
                                                    self.name())));
            }
            tokio::time::sleep(BALANCE_POLL).await;
        }
    }

    /// Detiene el engine y arranca otro sobre la misma store de checkpoints;
    /// los flows suspendidos se reanudan desde su último checkpoint.
    pub async fn restart(self) -> Result<Node, AppError> {
        self.engine.shutdown();
        log::info!("node.restart:begin name={}", self.config.name);
        let engine = build_engine(&self.transport, &self.config, self.services.clone(), self.checkpoints.clone());
        engine.start().await?;
        Ok(Node { engine, ..self })
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
