//! Conductor de réplicas: una tarea tokio por réplica, red en memoria con
//! particiones para tests y demo.
//!
//! El storage de cada réplica lo abre un `StorageOpener`. Con un storage
//! durable, `restart_replica` reconstruye la réplica desde disco: el log de
//! commits se rehace al volver a aplicar las entradas comprometidas.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ledger_domain::StateRef;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::commit_log::{CommitEntry, CommitLog, CommitOutcome, CommitRequest};
use crate::errors::NotaryError;
use crate::raft::config::RaftConfig;
use crate::raft::message::{EntryPayload, LogIndex, NodeId, RaftMessage, Term};
use crate::raft::node::{RaftNode, RaftOutput, Role};
use crate::raft::provider::RaftUniquenessProvider;
use crate::raft::storage::{MemRaftStorage, RaftError, RaftStorage};

type Reply<T> = oneshot::Sender<T>;

/// Abre (o reabre tras un reinicio) el storage de la réplica `id`.
pub type StorageOpener = Arc<dyn Fn(NodeId) -> Result<Box<dyn RaftStorage>, RaftError> + Send + Sync>;

pub(crate) enum ReplicaCommand {
    Propose {
        request: CommitRequest,
        reply: Reply<Result<CommitOutcome, NotaryError>>,
    },
    ConsumerOf {
        state: StateRef,
        reply: Reply<Option<CommitEntry>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub id: NodeId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<NodeId>,
    pub commit_index: LogIndex,
    /// Entradas `Commit` aplicadas a la máquina de estados local.
    pub applied_commits: usize,
}

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<(NodeId, RaftMessage)>>,
    isolated: HashSet<NodeId>,
}

/// Red entre réplicas. Un nodo aislado no envía ni recibe.
#[derive(Clone, Default)]
pub struct RaftNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl RaftNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn connect(&self, id: NodeId) -> mpsc::UnboundedReceiver<(NodeId, RaftMessage)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().inboxes.insert(id, tx);
        rx
    }

    fn send(&self, from: NodeId, to: NodeId, message: RaftMessage) {
        let state = self.lock();
        if state.isolated.contains(&from) || state.isolated.contains(&to) {
            return;
        }
        if let Some(inbox) = state.inboxes.get(&to) {
            let _ = inbox.send((from, message));
        }
    }

    pub fn isolate(&self, id: NodeId) {
        log::info!("raft.network:isolate node={id}");
        self.lock().isolated.insert(id);
    }

    pub fn heal(&self, id: NodeId) {
        log::info!("raft.network:heal node={id}");
        self.lock().isolated.remove(&id);
    }
}

pub(crate) struct ReplicaHandle {
    pub id: NodeId,
    pub commands: mpsc::UnboundedSender<ReplicaCommand>,
    pub status: watch::Receiver<ReplicaStatus>,
}

struct Replica {
    node: RaftNode<Box<dyn RaftStorage>>,
    state: CommitLog,
    applied_commits: usize,
    /// Solicitudes propuestas por esta réplica como líder, por índice.
    pending: BTreeMap<LogIndex, (Term, Reply<Result<CommitOutcome, NotaryError>>)>,
    network: RaftNetwork,
    status: Arc<watch::Sender<ReplicaStatus>>,
}

impl Replica {
    fn publish(&self) {
        self.status.send_replace(ReplicaStatus { id: self.node.id(),
                                                 role: self.node.role(),
                                                 term: self.node.term(),
                                                 leader: self.node.leader(),
                                                 commit_index: self.node.commit_index(),
                                                 applied_commits: self.applied_commits });
    }

    fn handle(&mut self, result: Result<Vec<RaftOutput>, RaftError>) {
        let outputs = match result {
            Ok(outputs) => outputs,
            Err(e) => {
                log::error!("raft.replica:error node={} error={e}", self.node.id());
                return;
            }
        };
        for output in outputs {
            match output {
                RaftOutput::Send { to, message } => self.network.send(self.node.id(), to, message),
                RaftOutput::Apply(entry) => {
                    let outcome = match &entry.payload {
                        EntryPayload::Noop => None,
                        EntryPayload::Commit(request) => {
                            self.applied_commits += 1;
                            Some(self.state.commit(request))
                        }
                    };
                    if let Some((term, reply)) = self.pending.remove(&entry.index) {
                        let answer = match outcome {
                            Some(outcome) if term == entry.term => outcome,
                            _ => Err(NotaryError::LeadershipLost { term }),
                        };
                        let _ = reply.send(answer);
                    }
                }
                RaftOutput::BecameLeader { term } => {
                    log::info!("raft.replica:leader node={} term={term}", self.node.id());
                }
                RaftOutput::LeadershipLost { term } => {
                    for (_, (_, reply)) in std::mem::take(&mut self.pending) {
                        let _ = reply.send(Err(NotaryError::LeadershipLost { term }));
                    }
                }
            }
        }
        self.publish();
    }

    fn on_command(&mut self, command: ReplicaCommand) {
        match command {
            ReplicaCommand::Propose { request, reply } => {
                match self.node.propose(EntryPayload::Commit(request)) {
                    Ok(((term, index), outputs)) => {
                        self.pending.insert(index, (term, reply));
                        self.handle(Ok(outputs));
                    }
                    Err(RaftError::NotLeader { .. }) => {
                        let _ = reply.send(Err(NotaryError::NotLeader(self.node.id())));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(NotaryError::Storage(e.to_string())));
                    }
                }
            }
            ReplicaCommand::ConsumerOf { state, reply } => {
                let _ = reply.send(self.state.get(&state).cloned());
            }
        }
    }

    async fn run(mut self,
                 tick: Duration,
                 mut inbox: mpsc::UnboundedReceiver<(NodeId, RaftMessage)>,
                 commands: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ReplicaCommand>>>) {
        // La cola de comandos sobrevive a los reinicios; la toma la réplica viva.
        let mut commands = commands.lock_owned().await;
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.node.tick();
                    self.handle(result);
                }
                Some((from, message)) = inbox.recv() => {
                    let result = self.node.step(from, message);
                    self.handle(result);
                }
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }
    }
}

/// Lo que el cluster conserva de una réplica entre reinicios.
struct ReplicaSlot {
    id: NodeId,
    commands: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ReplicaCommand>>>,
    status: Arc<watch::Sender<ReplicaStatus>>,
    task: Option<JoinHandle<()>>,
}

/// Cluster de réplicas en un proceso.
pub struct RaftCluster {
    network: RaftNetwork,
    ids: Vec<NodeId>,
    replicas: Vec<ReplicaHandle>,
    slots: Vec<ReplicaSlot>,
    opener: StorageOpener,
    config: RaftConfig,
}

impl RaftCluster {
    /// Arranca `size` réplicas con ids `1..=size` y storage en memoria.
    pub fn start(size: u64, config: RaftConfig) -> Self {
        let mut cluster = Self::empty(size, config, Arc::new(memory_storage));
        for id in cluster.ids.clone() {
            cluster.spawn(id, Box::new(MemRaftStorage::new()));
        }
        log::info!("raft.cluster:start size={} storage=memory", cluster.ids.len());
        cluster
    }

    /// Como `start`, pero cada réplica abre su storage con `opener`, que se
    /// vuelve a llamar en cada `restart_replica`.
    pub fn start_with(size: u64, config: RaftConfig, opener: StorageOpener) -> Result<Self, RaftError> {
        let mut cluster = Self::empty(size, config, opener);
        for id in cluster.ids.clone() {
            let storage = (cluster.opener)(id)?;
            cluster.spawn(id, storage);
        }
        log::info!("raft.cluster:start size={}", cluster.ids.len());
        Ok(cluster)
    }

    fn empty(size: u64, config: RaftConfig, opener: StorageOpener) -> Self {
        let network = RaftNetwork::new();
        let ids: Vec<NodeId> = (1..=size.max(1)).collect();
        let mut replicas = Vec::new();
        let mut slots = Vec::new();
        for id in &ids {
            let (status_tx, status_rx) = watch::channel(ReplicaStatus { id: *id,
                                                                        role: Role::Follower,
                                                                        term: 0,
                                                                        leader: None,
                                                                        commit_index: 0,
                                                                        applied_commits: 0 });
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            replicas.push(ReplicaHandle { id: *id,
                                          commands: cmd_tx,
                                          status: status_rx });
            slots.push(ReplicaSlot { id: *id,
                                     commands: Arc::new(tokio::sync::Mutex::new(cmd_rx)),
                                     status: Arc::new(status_tx),
                                     task: None });
        }
        Self { network,
               ids,
               replicas,
               slots,
               opener,
               config }
    }

    fn spawn(&mut self, id: NodeId, storage: Box<dyn RaftStorage>) {
        let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) else {
            return;
        };
        let replica = Replica { node: RaftNode::new(id, self.ids.clone(), storage, &self.config),
                                state: CommitLog::new(),
                                applied_commits: 0,
                                pending: BTreeMap::new(),
                                network: self.network.clone(),
                                status: slot.status.clone() };
        replica.publish();
        let inbox = self.network.connect(id);
        slot.task = Some(tokio::spawn(replica.run(self.config.tick, inbox, slot.commands.clone())));
    }

    /// Detiene la réplica `id`, espera a que suelte su storage y la vuelve a
    /// arrancar con lo que devuelva el opener.
    pub async fn restart_replica(&mut self, id: NodeId) -> Result<(), RaftError> {
        let slot = self.slots
                       .iter_mut()
                       .find(|s| s.id == id)
                       .ok_or_else(|| RaftError::Storage(format!("unknown replica {id}")))?;
        if let Some(task) = slot.task.take() {
            task.abort();
            let _ = task.await;
        }
        slot.status.send_modify(|s| {
            s.role = Role::Follower;
            s.leader = None;
        });
        let storage = (self.opener)(id)?;
        self.spawn(id, storage);
        log::info!("raft.cluster:restart node={id}");
        Ok(())
    }

    pub fn network(&self) -> &RaftNetwork {
        &self.network
    }

    pub fn statuses(&self) -> Vec<ReplicaStatus> {
        self.replicas.iter().map(|r| *r.status.borrow()).collect()
    }

    /// Líder del término más alto visible, si lo hay.
    pub fn leader(&self) -> Option<NodeId> {
        current_leader(&self.statuses())
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<NodeId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(id) = self.leader() {
                return Some(id);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.config.tick).await;
        }
    }

    pub async fn consumer_on(&self, replica: NodeId, state: StateRef) -> Option<CommitEntry> {
        let handle = self.replicas.iter().find(|r| r.id == replica)?;
        let (tx, rx) = oneshot::channel();
        handle.commands.send(ReplicaCommand::ConsumerOf { state, reply: tx }).ok()?;
        rx.await.ok().flatten()
    }

    pub fn provider(&self) -> RaftUniquenessProvider {
        let replicas = self.replicas
                           .iter()
                           .map(|r| ReplicaHandle { id: r.id,
                                                    commands: r.commands.clone(),
                                                    status: r.status.clone() })
                           .collect();
        RaftUniquenessProvider::new(replicas, self.config.clone())
    }

    pub fn shutdown(&mut self) {
        for slot in &mut self.slots {
            if let Some(task) = slot.task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for RaftCluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn memory_storage(_: NodeId) -> Result<Box<dyn RaftStorage>, RaftError> {
    Ok(Box::new(MemRaftStorage::new()))
}

pub(crate) fn current_leader(statuses: &[ReplicaStatus]) -> Option<NodeId> {
    statuses.iter()
            .filter(|s| s.role == Role::Leader)
            .max_by_key(|s| s.term)
            .map(|s| s.id)
}
