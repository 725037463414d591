use std::sync::Arc;
use std::time::Duration;

use ledger_core::messaging::{SessionBody, SessionEnvelope};
use ledger_core::{CheckpointStore, EngineConfig, FlowAction, FlowContext, FlowEngine, FlowError, FlowLogic,
                  FlowStatus, InMemoryCheckpointStore, InMemoryNetwork, InitiatingFlow, MessagingService, PeerId,
                  ResponderFlow, Resume, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
struct PingFlow {
    peer: String,
    topic: String,
    value: u64,
    timeout_ms: Option<u64>,
    session: Option<SessionId>,
}

#[derive(Deserialize)]
struct PingArgs {
    peer: String,
    value: u64,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl FlowLogic<()> for PingFlow {
    fn progress_steps(&self) -> &'static [&'static str] {
        &["sending", "waiting", "done"]
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_, ()>, input: Resume) -> Result<FlowAction, FlowError> {
        match input {
            Resume::Start => {
                ctx.progress_to("sending")?;
                let session = ctx.initiate_session(PeerId::new(self.peer.clone()), &self.topic);
                self.session = Some(session);
                ctx.progress_to("waiting")?;
                FlowAction::send_and_receive(session, &self.value, self.timeout_ms.map(Duration::from_millis))
            }
            other => {
                let (_, reply): (SessionId, u64) = other.into_message()?;
                ctx.progress_to("done")?;
                FlowAction::complete(&reply)
            }
        }
    }
}

impl InitiatingFlow<()> for PingFlow {
    const LOGIC_TYPE: &'static str = "test.ping";
    type Args = PingArgs;

    fn from_args(args: PingArgs) -> Result<Self, FlowError> {
        Ok(Self { peer: args.peer,
                  topic: args.topic.unwrap_or_else(|| "test.ping".into()),
                  value: args.value,
                  timeout_ms: args.timeout_ms,
                  session: None })
    }
}

#[derive(Serialize, Deserialize)]
struct PongFlow {
    session: SessionId,
    replied: bool,
}

impl FlowLogic<()> for PongFlow {
    fn resume(&mut self, _ctx: &mut FlowContext<'_, ()>, input: Resume) -> Result<FlowAction, FlowError> {
        match input {
            Resume::Start => Ok(FlowAction::receive(self.session, None)),
            Resume::Sent if self.replied => FlowAction::complete(&()),
            other => {
                let (session, value): (SessionId, u64) = other.into_message()?;
                self.replied = true;
                FlowAction::send(session, &(value + 1))
            }
        }
    }
}

impl ResponderFlow<()> for PongFlow {
    const LOGIC_TYPE: &'static str = "test.pong";
    const INITIATED_BY: &'static str = "test.ping";

    fn on_initiated(session: SessionId, _counterparty: &PeerId) -> Self {
        Self { session,
               replied: false }
    }
}

#[derive(Serialize, Deserialize)]
struct FailingResponder;

impl FlowLogic<()> for FailingResponder {
    fn resume(&mut self, _ctx: &mut FlowContext<'_, ()>, _input: Resume) -> Result<FlowAction, FlowError> {
        Err(FlowError::Internal("boom".into()))
    }
}

impl ResponderFlow<()> for FailingResponder {
    const LOGIC_TYPE: &'static str = "test.failing";
    const INITIATED_BY: &'static str = "test.fail";

    fn on_initiated(_session: SessionId, _counterparty: &PeerId) -> Self {
        FailingResponder
    }
}

fn node(net: &InMemoryNetwork, name: &str, store: Arc<dyn CheckpointStore>) -> FlowEngine<()> {
    node_with(net, name, store, EngineConfig::default())
}

fn node_with(net: &InMemoryNetwork,
             name: &str,
             store: Arc<dyn CheckpointStore>,
             config: EngineConfig)
             -> FlowEngine<()> {
    FlowEngine::builder(Arc::new(()), Arc::new(net.endpoint(PeerId::new(name))))
        .checkpoints(store)
        .config(config)
        .register_initiator::<PingFlow>()
        .register_responder::<PongFlow>()
        .register_responder::<FailingResponder>()
        .build()
}

async fn wait_for_status(store: &dyn CheckpointStore, flow_id: Uuid, status: FlowStatus) {
    for _ in 0..200 {
        if let Ok(Some(cp)) = store.get(flow_id) {
            if cp.status == status {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("flow {flow_id} never reached {status:?}");
}

#[tokio::test]
async fn ping_pong_completes_and_clears_checkpoints() {
    let net = InMemoryNetwork::new();
    let store_a = Arc::new(InMemoryCheckpointStore::new());
    let store_b = Arc::new(InMemoryCheckpointStore::new());
    let a = node(&net, "A", store_a.clone());
    let b = node(&net, "B", store_b.clone());
    a.start().await.unwrap();
    b.start().await.unwrap();

    let handle = a.start_flow("test.ping", json!({"peer": "B", "value": 41})).unwrap();
    let reply: u64 = handle.result.wait_as().await.unwrap();
    assert_eq!(reply, 42);

    assert!(store_a.is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(store_b.is_empty());
    let infos = a.list_flows();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].status, FlowStatus::Completed);
    assert_eq!(net.pending_for(&PeerId::new("A")), 0);
}

#[tokio::test]
async fn typed_start_and_progress_stream() {
    let net = InMemoryNetwork::new();
    let a = node(&net, "A", Arc::new(InMemoryCheckpointStore::new()));
    let b = node(&net, "B", Arc::new(InMemoryCheckpointStore::new()));
    a.start().await.unwrap();
    b.start().await.unwrap();

    let flow = PingFlow::from_args(PingArgs { peer: "B".into(),
                                              value: 1,
                                              topic: None,
                                              timeout_ms: None }).unwrap();
    let mut handle = a.start_typed(flow).unwrap();
    let mut seen = Vec::new();
    while let Some(step) = handle.progress.next().await {
        seen.push(step);
    }
    assert_eq!(seen.last().map(String::as_str), Some("done"));
    assert!(seen.iter().all(|s| ["sending", "waiting", "done"].contains(&s.as_str())));
    assert_eq!(handle.result.wait().await.unwrap(), json!(2));
}

#[tokio::test]
async fn unregistered_logic_type_is_rejected() {
    let net = InMemoryNetwork::new();
    let a = node(&net, "A", Arc::new(InMemoryCheckpointStore::new()));
    a.start().await.unwrap();
    let err = a.start_flow("test.nope", json!({})).err().unwrap();
    assert_eq!(err, FlowError::UnknownLogicType("test.nope".into()));
}

#[tokio::test]
async fn receive_times_out_when_peer_is_silent() {
    let net = InMemoryNetwork::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let a = node(&net, "A", store.clone());
    a.start().await.unwrap();

    let handle = a.start_flow("test.ping", json!({"peer": "Z", "value": 1, "timeout_ms": 30})).unwrap();
    let id = handle.id;
    let err = handle.result.wait().await.unwrap_err();
    assert!(matches!(err, FlowError::SessionTimeout { .. }));

    let cp = store.get(id).unwrap().unwrap();
    assert_eq!(cp.status, FlowStatus::Failed);
    assert_eq!(cp.error, Some(err));
}

#[tokio::test]
async fn unknown_topic_fails_the_initiator_with_counterparty_error() {
    let net = InMemoryNetwork::new();
    let a = node(&net, "A", Arc::new(InMemoryCheckpointStore::new()));
    let b = node(&net, "B", Arc::new(InMemoryCheckpointStore::new()));
    a.start().await.unwrap();
    b.start().await.unwrap();

    let handle = a.start_flow("test.ping", json!({"peer": "B", "value": 1, "topic": "test.nobody"})).unwrap();
    match handle.result.wait().await {
        Err(FlowError::Counterparty { peer, .. }) => assert_eq!(peer, "B"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(b.list_flows().is_empty());
}

#[tokio::test]
async fn responder_failure_propagates_to_initiator() {
    let net = InMemoryNetwork::new();
    let a = node(&net, "A", Arc::new(InMemoryCheckpointStore::new()));
    let store_b = Arc::new(InMemoryCheckpointStore::new());
    let b = node(&net, "B", store_b.clone());
    a.start().await.unwrap();
    b.start().await.unwrap();

    let handle = a.start_flow("test.ping", json!({"peer": "B", "value": 1, "topic": "test.fail"})).unwrap();
    let err = handle.result.wait().await.unwrap_err();
    assert_eq!(err,
               FlowError::Counterparty { peer: "B".into(),
                                         message: "internal: boom".into() });

    let failed = b.list_flows();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, FlowStatus::Failed);
    assert_eq!(failed[0].logic_type, "test.failing");
}

#[tokio::test]
async fn suspended_flow_survives_restart() {
    let net = InMemoryNetwork::new();
    let store_a = Arc::new(InMemoryCheckpointStore::new());
    let a = node(&net, "A", store_a.clone());
    a.start().await.unwrap();

    // B todavía no escucha: A queda suspendido esperando la respuesta.
    let handle = a.start_flow("test.ping", json!({"peer": "B", "value": 9})).unwrap();
    let id = handle.id;
    wait_for_status(store_a.as_ref(), id, FlowStatus::Suspended).await;
    a.shutdown();
    assert!(handle.result.wait().await.is_err());

    let a2 = node(&net, "A", store_a.clone());
    a2.start().await.unwrap();
    let restored = a2.handle(id).unwrap();
    let b = node(&net, "B", Arc::new(InMemoryCheckpointStore::new()));
    b.start().await.unwrap();

    let reply: u64 = restored.result.wait_as().await.unwrap();
    assert_eq!(reply, 10);
    assert!(store_a.is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    // El ping retransmitido al reiniciar no crea un segundo responder.
    assert_eq!(b.list_flows().len(), 1);
}

#[tokio::test]
async fn corrupted_checkpoint_is_reported_and_kept() {
    let net = InMemoryNetwork::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let id = Uuid::new_v4();
    store.insert_raw(id, "{not json");
    let a = node(&net, "A", store.clone());
    a.start().await.unwrap();

    let infos = a.list_flows();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].status, FlowStatus::Failed);
    assert!(matches!(infos[0].error, Some(FlowError::CheckpointCorruption { .. })));
    let err = a.handle(id).unwrap().result.wait().await.unwrap_err();
    assert!(matches!(err, FlowError::CheckpointCorruption { flow_id, .. } if flow_id == id));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn kill_flow_aborts_a_waiting_flow() {
    let net = InMemoryNetwork::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let a = node(&net, "A", store.clone());
    a.start().await.unwrap();

    let handle = a.start_flow("test.ping", json!({"peer": "B", "value": 1})).unwrap();
    let id = handle.id;
    wait_for_status(store.as_ref(), id, FlowStatus::Suspended).await;

    assert!(a.kill_flow(id).await);
    assert_eq!(handle.result.wait().await.unwrap_err(), FlowError::Aborted);
    assert!(!a.kill_flow(id).await);
    assert_eq!(store.get(id).unwrap().unwrap().status, FlowStatus::Failed);
}

#[tokio::test]
async fn failed_checkpoint_is_listed_after_restart() {
    let net = InMemoryNetwork::new();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let a = node(&net, "A", store.clone());
    a.start().await.unwrap();
    let handle = a.start_flow("test.ping", json!({"peer": "Z", "value": 1, "timeout_ms": 10})).unwrap();
    let id = handle.id;
    handle.result.wait().await.unwrap_err();
    a.shutdown();

    let a2 = node(&net, "A", store.clone());
    a2.start().await.unwrap();
    let info = a2.list_flows().into_iter().find(|i| i.flow_id == id).unwrap();
    assert_eq!(info.status, FlowStatus::Failed);
    assert!(matches!(info.error, Some(FlowError::SessionTimeout { .. })));
}

fn short_memory() -> EngineConfig {
    EngineConfig { finished_retention: 8,
                   closed_session_retention: 8,
                   ..EngineConfig::default() }
}

#[tokio::test]
async fn finished_flows_are_forgotten_beyond_the_retention_window() {
    let net = InMemoryNetwork::new();
    let a = node_with(&net, "A", Arc::new(InMemoryCheckpointStore::new()), short_memory());
    let b = node_with(&net, "B", Arc::new(InMemoryCheckpointStore::new()), short_memory());
    a.start().await.unwrap();
    b.start().await.unwrap();

    let mut ids = Vec::new();
    for i in 0..200u64 {
        let handle = a.start_flow("test.ping", json!({"peer": "B", "value": i})).unwrap();
        ids.push(handle.id);
        let reply: u64 = handle.result.wait_as().await.unwrap();
        assert_eq!(reply, i + 1);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let infos = a.list_flows();
    assert_eq!(infos.len(), 8);
    assert!(infos.iter().all(|i| i.status == FlowStatus::Completed));
    assert!(b.list_flows().len() <= 8, "responder node retains {} completed flows", b.list_flows().len());

    assert!(a.handle(ids[0]).is_none());
    let last = a.handle(ids[199]).expect("most recent flow is still queryable");
    assert_eq!(last.result.try_get().unwrap().unwrap(), json!(200));
}

#[tokio::test]
async fn late_redelivery_of_a_finished_session_is_dropped() {
    let net = InMemoryNetwork::new();
    let b = node_with(&net, "B", Arc::new(InMemoryCheckpointStore::new()), short_memory());
    b.start().await.unwrap();
    let x = net.endpoint(PeerId::new("X"));
    let opening = SessionEnvelope { sender: PeerId::new("X"),
                                    session_id: SessionId::new(),
                                    sequence: 0,
                                    topic: "test.ping".into(),
                                    body: SessionBody::Data(serde_json::to_vec(&1u64).unwrap()) };

    x.send(&PeerId::new("B"), &opening).unwrap();
    for _ in 0..200 {
        if b.list_flows().iter().any(|i| i.status == FlowStatus::Completed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    x.send(&PeerId::new("B"), &opening).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let infos = b.list_flows();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].status, FlowStatus::Completed);
    assert_eq!(net.pending_for(&PeerId::new("B")), 0);
}
