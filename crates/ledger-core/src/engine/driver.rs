//! `FlowEngine`: conduce flows entre puntos de suspensión.
//!
//! Reglas que mantiene el engine:
//! - cada flow vive detrás de su propio lock y sólo lo muta la tarea que lo
//!   conduce en ese momento;
//! - antes de suspender (o de transmitir mensajes) se escribe el checkpoint;
//! - un mensaje entrante se confirma al transporte sólo después de que su
//!   efecto quedó en un checkpoint (o el flow terminó);
//! - los mensajes de una sesión se entregan en orden de secuencia;
//! - de los flows terminados sólo se recuerdan los últimos
//!   `finished_retention` (info y resultado) y las últimas
//!   `closed_session_retention` sesiones cerradas.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, FlowStatus, WaitRecord};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::handle::{FlowHandle, FlowInfo, FlowOutcome, FlowResult};
use crate::engine::registry::FlowRegistry;
use crate::engine::retention::Retention;
use crate::engine::runtime::FlowRuntime;
use crate::errors::FlowError;
use crate::flow::{ErasedFlow, FlowAction, FlowContext, InitiatingFlow, Outgoing, Resume};
use crate::messaging::{ErrorNotice, InboundMessage, MessageId, MessagingService, PeerId, SessionBody,
                       SessionEnvelope};
use crate::progress::{ProgressStream, ProgressTracker};
use crate::session::{Offer, Session, SessionId, SessionState};
use crate::FlowId;

type SharedRuntime<S> = Arc<Mutex<FlowRuntime<S>>>;

/// Qué hacer con un flow recién restaurado.
enum Kick {
    Drive(Resume),
    /// Vuelve a esperar en su sesión (re-armando el deadline).
    Rearm,
}

/// Resultado de intentar continuar sin suspender.
enum Step {
    Continue(Resume),
    Stop,
}

pub(crate) struct EngineInner<S> {
    pub identity: PeerId,
    pub services: Arc<S>,
    pub registry: FlowRegistry<S>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub transport: Arc<dyn MessagingService>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
    flows: DashMap<FlowId, SharedRuntime<S>>,
    sessions: DashMap<SessionId, FlowId>,
    results: DashMap<FlowId, watch::Sender<Option<FlowOutcome>>>,
    trackers: DashMap<FlowId, ProgressTracker>,
    infos: DashMap<FlowId, FlowInfo>,
    finished: StdMutex<Retention<FlowId>>,
    /// Sesiones de flows terminados que siguen en `sessions`.
    closed_sessions: StdMutex<Retention<SessionId>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

/// Motor de flows de un nodo. Es barato de clonar.
pub struct FlowEngine<S> {
    pub(crate) inner: Arc<EngineInner<S>>,
}

impl<S> Clone for FlowEngine<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S: Send + Sync + 'static> FlowEngine<S> {
    pub(crate) fn from_parts(identity: PeerId,
                             services: Arc<S>,
                             registry: FlowRegistry<S>,
                             checkpoints: Arc<dyn CheckpointStore>,
                             transport: Arc<dyn MessagingService>,
                             clock: Arc<dyn Clock>,
                             config: EngineConfig)
                             -> Self {
        let finished = StdMutex::new(Retention::new(config.finished_retention));
        let closed_sessions = StdMutex::new(Retention::new(config.closed_session_retention));
        Self { inner: Arc::new(EngineInner { identity,
                                             services,
                                             registry,
                                             checkpoints,
                                             transport,
                                             clock,
                                             config,
                                             flows: DashMap::new(),
                                             sessions: DashMap::new(),
                                             results: DashMap::new(),
                                             trackers: DashMap::new(),
                                             infos: DashMap::new(),
                                             finished,
                                             closed_sessions,
                                             tasks: StdMutex::new(Vec::new()),
                                             running: AtomicBool::new(false) }) }
    }

    pub fn identity(&self) -> &PeerId {
        &self.inner.identity
    }

    pub fn services(&self) -> &Arc<S> {
        &self.inner.services
    }

    pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.inner.checkpoints
    }

    /// Restaura los flows con checkpoint pendiente y conecta el transporte.
    pub async fn start(&self) -> Result<(), FlowError> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut kicks = Vec::new();
        for (flow_id, loaded) in inner.checkpoints.scan()? {
            let cp = match loaded {
                Ok(cp) => cp,
                Err(e) => {
                    inner.mark_unrecoverable(flow_id, "unknown", e.into());
                    continue;
                }
            };
            match cp.status {
                FlowStatus::Failed => {
                    let error = cp.error
                                  .clone()
                                  .unwrap_or_else(|| FlowError::Internal("failed without recorded error".into()));
                    inner.infos.insert(flow_id,
                                       FlowInfo { flow_id,
                                                  status: FlowStatus::Failed,
                                                  logic_type: cp.logic_type.clone(),
                                                  progress_step: cp.progress_step.clone(),
                                                  error: Some(error.clone()) });
                    inner.publish(flow_id, Err(error));
                    inner.retire(flow_id, Vec::new());
                }
                FlowStatus::Completed => {
                    let _ = inner.checkpoints.delete(flow_id);
                }
                FlowStatus::Runnable | FlowStatus::Suspended => {
                    let logic_type = cp.logic_type.clone();
                    match inner.restore(cp) {
                        Ok(kick) => kicks.push((flow_id, kick)),
                        Err(e) => inner.mark_unrecoverable(flow_id, &logic_type, e),
                    }
                }
            }
        }
        log::info!("engine.start:restored node={} flows={}", inner.identity, kicks.len());

        let rx = inner.transport.subscribe()?;
        let pump = tokio::spawn(Self::pump(inner.clone(), rx));
        inner.track(pump);

        for (flow_id, kick) in kicks {
            let inner = inner.clone();
            let h = tokio::spawn(async move { inner.kick(flow_id, kick).await });
            self.inner.track(h);
        }
        Ok(())
    }

    async fn pump(inner: Arc<EngineInner<S>>, mut rx: mpsc::UnboundedReceiver<InboundMessage>) {
        while let Some(msg) = rx.recv().await {
            if !inner.is_running() {
                break;
            }
            inner.on_inbound(msg).await;
        }
        log::debug!("engine.pump:stopped node={}", inner.identity);
    }

    /// Detiene el engine sin tocar los checkpoints; un engine nuevo sobre la
    /// misma store retoma los flows.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.running.store(false, Ordering::SeqCst);
        inner.transport.close();
        let tasks = std::mem::take(&mut *inner.tasks.lock().unwrap_or_else(|p| p.into_inner()));
        for t in tasks {
            t.abort();
        }
        inner.flows.clear();
        inner.sessions.clear();
        inner.closed_sessions.lock().unwrap_or_else(|p| p.into_inner()).clear();
        inner.trackers.clear();
        // Quien espere un resultado recibe "engine stopped".
        inner.results.clear();
        log::info!("engine.shutdown node={}", inner.identity);
    }

    /// Arranca un flow iniciador registrado a partir de argumentos JSON.
    pub fn start_flow(&self, logic_type: &str, args: Value) -> Result<FlowHandle, FlowError> {
        let (logic_type, factory) =
            self.inner.registry.initiator(logic_type).ok_or_else(|| FlowError::UnknownLogicType(logic_type.into()))?;
        let flow = factory(args)?;
        self.launch(logic_type, flow)
    }

    /// Variante tipada de `start_flow`; `F` debe estar registrado para poder
    /// restaurarse tras un reinicio.
    pub fn start_typed<F: InitiatingFlow<S>>(&self, flow: F) -> Result<FlowHandle, FlowError> {
        if self.inner.registry.restorer(F::LOGIC_TYPE).is_none() {
            return Err(FlowError::UnknownLogicType(F::LOGIC_TYPE.into()));
        }
        self.launch(F::LOGIC_TYPE, Box::new(flow))
    }

    fn launch(&self, logic_type: &str, flow: Box<dyn ErasedFlow<S>>) -> Result<FlowHandle, FlowError> {
        let inner = &self.inner;
        if !inner.is_running() {
            return Err(FlowError::Internal("engine not started".into()));
        }
        let id = Uuid::new_v4();
        let rt = FlowRuntime::new(id, logic_type, flow, inner.clock.now());
        let cp = rt.to_checkpoint(inner.clock.now())?;
        inner.checkpoints.put(&cp)?;
        let shared = inner.register(rt);
        let handle = self.handle(id).ok_or_else(|| FlowError::Internal("flow vanished after start".into()))?;
        log::info!("flow.start flow_id={id} logic_type={logic_type} node={}", inner.identity);

        let task_inner = inner.clone();
        let h = tokio::spawn(async move {
            let mut rt = shared.lock().await;
            if task_inner.is_running() && !rt.is_terminal() && rt.wait == Some(WaitRecord::Start) {
                task_inner.drive(&mut rt, Resume::Start);
            }
        });
        inner.track(h);
        Ok(handle)
    }

    /// Handle de un flow conocido: vivo, terminado hace poco (dentro de
    /// `finished_retention`) o fallido y restaurado de la store.
    pub fn handle(&self, flow_id: FlowId) -> Option<FlowHandle> {
        let inner = &self.inner;
        let rx = inner.results.get(&flow_id)?.subscribe();
        let progress = inner.trackers
                            .get(&flow_id)
                            .map(|t| t.subscribe())
                            .unwrap_or_else(ProgressStream::closed);
        Some(FlowHandle { id: flow_id,
                          progress,
                          result: FlowResult::new(rx) })
    }

    pub fn list_flows(&self) -> Vec<FlowInfo> {
        let mut v: Vec<FlowInfo> = self.inner.infos.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.logic_type.cmp(&b.logic_type).then(a.flow_id.cmp(&b.flow_id)));
        v
    }

    /// Aborta un flow vivo: queda FAILED con `Aborted` y se avisa a las
    /// contrapartes. Devuelve `false` si el flow no está vivo.
    pub async fn kill_flow(&self, flow_id: FlowId) -> bool {
        let Some(shared) = self.inner.flows.get(&flow_id).map(|e| e.value().clone()) else {
            return false;
        };
        let mut rt = shared.lock().await;
        if rt.is_terminal() {
            return false;
        }
        rt.epoch += 1;
        log::warn!("flow.kill flow_id={flow_id}");
        self.inner.fail(&mut rt, FlowError::Aborted);
        true
    }
}

impl<S: Send + Sync + 'static> EngineInner<S> {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn ensure_result(&self, flow_id: FlowId) {
        self.results.entry(flow_id).or_insert_with(|| watch::channel(None).0);
    }

    fn publish(&self, flow_id: FlowId, outcome: FlowOutcome) {
        self.results
            .entry(flow_id)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(outcome));
    }

    fn register(&self, rt: FlowRuntime<S>) -> SharedRuntime<S> {
        let id = rt.id;
        for sid in rt.sessions.keys() {
            self.sessions.insert(*sid, id);
        }
        self.trackers.insert(id, rt.progress.clone());
        self.infos.insert(id, rt.info());
        self.ensure_result(id);
        let shared = Arc::new(Mutex::new(rt));
        self.flows.insert(id, shared.clone());
        shared
    }

    fn mark_unrecoverable(&self, flow_id: FlowId, logic_type: &str, error: FlowError) {
        log::error!("flow.restore:unrecoverable flow_id={flow_id} error={error}");
        self.infos.insert(flow_id,
                          FlowInfo { flow_id,
                                     status: FlowStatus::Failed,
                                     logic_type: logic_type.to_string(),
                                     progress_step: None,
                                     error: Some(error.clone()) });
        self.publish(flow_id, Err(error));
        self.retire(flow_id, Vec::new());
    }

    /// Anota un flow terminado y olvida lo que sale de las ventanas de
    /// retención. Un `FlowResult` ya entregado conserva el último valor.
    fn retire(&self, flow_id: FlowId, sessions: Vec<SessionId>) {
        let evicted = self.finished.lock().unwrap_or_else(|p| p.into_inner()).push(flow_id);
        for id in evicted {
            self.infos.remove(&id);
            self.results.remove(&id);
        }
        let mut closed = self.closed_sessions.lock().unwrap_or_else(|p| p.into_inner());
        let mut forgotten = Vec::new();
        for sid in sessions {
            forgotten.extend(closed.push(sid));
        }
        drop(closed);
        for sid in forgotten {
            self.sessions.remove(&sid);
        }
    }

    fn restore(&self, cp: crate::checkpoint::Checkpoint) -> Result<Kick, FlowError> {
        let restore = self.registry
                          .restorer(&cp.logic_type)
                          .ok_or_else(|| FlowError::UnknownLogicType(cp.logic_type.clone()))?;
        let flow_id = cp.flow_id;
        let flow = restore(&cp.continuation).map_err(|e| FlowError::CheckpointCorruption { flow_id,
                                                                                           reason: e.to_string() })?;
        let rt = FlowRuntime::from_checkpoint(cp, flow);
        let kick = match &rt.wait {
            None | Some(WaitRecord::Start) => Kick::Drive(Resume::Start),
            Some(WaitRecord::Sent) => Kick::Drive(Resume::Sent),
            Some(WaitRecord::Operation) => Kick::Drive(Resume::OperationInterrupted),
            Some(WaitRecord::Session { .. }) => Kick::Rearm,
        };
        log::debug!("flow.restore flow_id={flow_id} wait={:?}", rt.wait);
        self.register(rt);
        Ok(kick)
    }

    async fn kick(self: Arc<Self>, flow_id: FlowId, kick: Kick) {
        let Some(shared) = self.flows.get(&flow_id).map(|e| e.value().clone()) else {
            return;
        };
        let mut rt = shared.lock().await;
        if rt.is_terminal() {
            return;
        }
        // Lo pendiente en el checkpoint puede no haber salido; el receptor
        // descarta duplicados.
        self.flush(&mut rt);
        match kick {
            Kick::Drive(input) => self.drive(&mut rt, input),
            Kick::Rearm => {
                if let Some(WaitRecord::Session { session, deadline }) = rt.wait.clone() {
                    rt.epoch += 1;
                    if let Some(input) = self.take_message(&mut rt, session) {
                        self.drive(&mut rt, input);
                    } else if let Some(deadline) = deadline {
                        self.arm_timer(flow_id, rt.epoch, deadline);
                    }
                }
            }
        }
    }

    async fn on_inbound(self: &Arc<Self>, msg: InboundMessage) {
        let env = match SessionEnvelope::decode(&msg.bytes) {
            Ok(env) => env,
            Err(e) => {
                log::warn!("transport.inbound:malformed node={} error={e}", self.identity);
                self.transport.acknowledge(msg.id);
                return;
            }
        };
        let known = self.sessions.get(&env.session_id).map(|e| *e.value());
        let flow_id = match known {
            Some(id) => id,
            None => match self.spawn_responder(&env) {
                Some(id) => id,
                None => {
                    self.transport.acknowledge(msg.id);
                    return;
                }
            },
        };
        self.deliver(flow_id, msg.id, env).await;
    }

    fn spawn_responder(&self, env: &SessionEnvelope) -> Option<FlowId> {
        if env.sequence != 0 || !matches!(env.body, SessionBody::Data(_)) {
            log::debug!("session.unknown node={} session={} seq={} (dropped)",
                        self.identity,
                        env.session_id,
                        env.sequence);
            return None;
        }
        let Some((logic_type, factory)) = self.registry.responder(&env.topic) else {
            log::warn!("session.reject node={} topic={} from={}", self.identity, env.topic, env.sender);
            let error = FlowError::UnknownLogicType(env.topic.clone());
            let reject = SessionEnvelope { sender: self.identity.clone(),
                                           session_id: env.session_id,
                                           sequence: 0,
                                           topic: env.topic.clone(),
                                           body: SessionBody::Error(ErrorNotice { message: format!("no responder for {}",
                                                                                                   env.topic),
                                                                                  error }) };
            if let Err(e) = self.transport.send(&env.sender, &reject) {
                log::warn!("session.reject:send_failed error={e}");
            }
            return None;
        };
        let id = Uuid::new_v4();
        let flow = factory(env.session_id, &env.sender);
        let mut rt = FlowRuntime::new(id, logic_type, flow, self.clock.now());
        rt.sessions.insert(env.session_id,
                           Session::new(env.session_id, env.sender.clone(), env.topic.clone(), false));
        log::info!("flow.start flow_id={id} logic_type={logic_type} node={} initiator={}",
                   self.identity,
                   env.sender);
        self.register(rt);
        Some(id)
    }

    async fn deliver(self: &Arc<Self>, flow_id: FlowId, message_id: MessageId, env: SessionEnvelope) {
        let Some(shared) = self.flows.get(&flow_id).map(|e| e.value().clone()) else {
            self.transport.acknowledge(message_id);
            return;
        };
        let mut guard = shared.lock().await;
        let rt = &mut *guard;
        if rt.is_terminal() || !self.is_running() {
            self.transport.acknowledge(message_id);
            return;
        }
        let Some(session) = rt.sessions.get_mut(&env.session_id) else {
            self.transport.acknowledge(message_id);
            return;
        };
        if session.offer(env.sequence, message_id, env.body) == Offer::Duplicate {
            log::debug!("session.duplicate flow_id={flow_id} session={} seq={}",
                        env.session_id,
                        env.sequence);
            self.transport.acknowledge(message_id);
            return;
        }
        match rt.wait.clone() {
            Some(WaitRecord::Start) => self.drive(rt, Resume::Start),
            Some(WaitRecord::Session { session: waiting, .. }) => {
                if let Some(input) = self.take_message(rt, waiting) {
                    self.drive(rt, input);
                } else if let Some(input) = self.take_counterparty_error(rt) {
                    self.drive(rt, input);
                }
            }
            _ => {}
        }
    }

    async fn on_timeout(self: Arc<Self>, flow_id: FlowId, epoch: u64) {
        let Some(shared) = self.flows.get(&flow_id).map(|e| e.value().clone()) else {
            return;
        };
        let mut rt = shared.lock().await;
        if !self.is_running() || rt.epoch != epoch || rt.is_terminal() {
            return;
        }
        if let Some(WaitRecord::Session { session, .. }) = rt.wait.clone() {
            log::warn!("session.timeout flow_id={flow_id} session={session}");
            self.drive(&mut rt,
                       Resume::Failed { session,
                                        error: FlowError::SessionTimeout { session } });
        }
    }

    async fn on_operation(self: Arc<Self>, flow_id: FlowId, epoch: u64, result: FlowOutcome) {
        let Some(shared) = self.flows.get(&flow_id).map(|e| e.value().clone()) else {
            return;
        };
        let mut rt = shared.lock().await;
        if !self.is_running() || rt.epoch != epoch || rt.is_terminal() {
            return;
        }
        if rt.wait == Some(WaitRecord::Operation) {
            self.drive(&mut rt, Resume::OperationCompleted(result));
        }
    }

    /// Conduce el flow hasta que suspende o termina.
    fn drive(self: &Arc<Self>, rt: &mut FlowRuntime<S>, input: Resume) {
        let mut input = input;
        loop {
            rt.status = FlowStatus::Runnable;
            rt.wait = None;
            let kind = input.kind();
            let action = {
                let mut ctx = FlowContext { flow_id: rt.id,
                                            identity: &self.identity,
                                            services: &*self.services,
                                            sessions: &mut rt.sessions,
                                            progress: &rt.progress,
                                            clock: &*self.clock,
                                            config: &self.config };
                rt.flow.resume(&mut ctx, input)
            };
            self.sync_sessions(rt);
            let action = match action {
                Ok(action) => action,
                Err(e) => return self.fail(rt, e),
            };
            log::debug!("flow.step flow_id={} input={kind} action={}", rt.id, action.describe());

            let step = match action {
                FlowAction::Complete { result } => return self.complete(rt, result),
                FlowAction::Send { messages } => self.send_and_continue(rt, messages),
                FlowAction::Receive { session, timeout } => self.wait_for_message(rt, session, timeout, false),
                FlowAction::SendAndReceive { message, timeout } => {
                    let session = message.session;
                    match self.queue(rt, vec![message]) {
                        Ok(()) => self.wait_for_message(rt, session, timeout, true),
                        Err(e) => {
                            self.fail(rt, e);
                            Step::Stop
                        }
                    }
                }
                FlowAction::Await { operation } => {
                    self.await_operation(rt, operation);
                    Step::Stop
                }
            };
            match step {
                Step::Continue(next) => input = next,
                Step::Stop => return,
            }
        }
    }

    /// Registra en el índice global las sesiones abiertas durante el paso.
    fn sync_sessions(&self, rt: &FlowRuntime<S>) {
        for sid in rt.sessions.keys() {
            if !self.sessions.contains_key(sid) {
                self.sessions.insert(*sid, rt.id);
            }
        }
        if let Some(mut info) = self.infos.get_mut(&rt.id) {
            info.progress_step = rt.progress.current();
        }
    }

    fn queue(&self, rt: &mut FlowRuntime<S>, messages: Vec<Outgoing>) -> Result<(), FlowError> {
        for m in messages {
            let session = rt.sessions.get_mut(&m.session).ok_or(FlowError::UnknownSession(m.session))?;
            if !session.is_open() {
                return Err(FlowError::SessionEnded { session: m.session });
            }
            session.queue(SessionBody::Data(m.payload));
        }
        Ok(())
    }

    fn send_and_continue(self: &Arc<Self>, rt: &mut FlowRuntime<S>, messages: Vec<Outgoing>) -> Step {
        if let Err(e) = self.queue(rt, messages) {
            self.fail(rt, e);
            return Step::Stop;
        }
        rt.wait = Some(WaitRecord::Sent);
        if let Err(e) = self.persist(rt, FlowStatus::Runnable) {
            self.fail(rt, e);
            return Step::Stop;
        }
        self.flush(rt);
        self.ack_pending(rt);
        Step::Continue(Resume::Sent)
    }

    fn wait_for_message(self: &Arc<Self>,
                        rt: &mut FlowRuntime<S>,
                        session: SessionId,
                        timeout: Option<Duration>,
                        sent: bool)
                        -> Step {
        if !rt.sessions.contains_key(&session) {
            return Step::Continue(Resume::Failed { session,
                                                   error: FlowError::UnknownSession(session) });
        }
        if !sent {
            if let Some(input) = self.take_message(rt, session) {
                return Step::Continue(input);
            }
        }
        let deadline = timeout.map(|t| self.deadline_after(t));
        rt.epoch += 1;
        rt.wait = Some(WaitRecord::Session { session, deadline });
        if let Err(e) = self.persist(rt, FlowStatus::Suspended) {
            self.fail(rt, e);
            return Step::Stop;
        }
        self.flush(rt);
        if sent {
            if let Some(input) = self.take_message(rt, session) {
                return Step::Continue(input);
            }
        }
        self.ack_pending(rt);
        if let Some(deadline) = deadline {
            self.arm_timer(rt.id, rt.epoch, deadline);
        }
        Step::Stop
    }

    fn await_operation(self: &Arc<Self>, rt: &mut FlowRuntime<S>, operation: crate::flow::OperationFuture) {
        rt.epoch += 1;
        rt.wait = Some(WaitRecord::Operation);
        if let Err(e) = self.persist(rt, FlowStatus::Suspended) {
            self.fail(rt, e);
            return;
        }
        self.flush(rt);
        self.ack_pending(rt);
        let (flow_id, epoch) = (rt.id, rt.epoch);
        let inner = self.clone();
        let h = tokio::spawn(async move {
            let result = operation.await;
            inner.on_operation(flow_id, epoch, result).await;
        });
        self.track(h);
    }

    fn deadline_after(&self, timeout: Duration) -> DateTime<Utc> {
        let delta = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365));
        self.clock.now() + delta
    }

    fn arm_timer(self: &Arc<Self>, flow_id: FlowId, epoch: u64, deadline: DateTime<Utc>) {
        let delay = (deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let inner = self.clone();
        let h = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timeout(flow_id, epoch).await;
        });
        self.track(h);
    }

    /// Siguiente mensaje en orden de `session`, traducido a entrada del flow.
    fn take_message(&self, rt: &mut FlowRuntime<S>, session: SessionId) -> Option<Resume> {
        let s = rt.sessions.get_mut(&session)?;
        match s.take_next() {
            Some(buffered) => {
                rt.pending_acks.push(buffered.message_id);
                Some(match buffered.body {
                    SessionBody::Data(payload) => Resume::Received { session, payload },
                    SessionBody::End => Resume::Failed { session,
                                                         error: FlowError::SessionEnded { session } },
                    SessionBody::Error(notice) => Resume::Failed { session,
                                                                   error: FlowError::Counterparty { peer: s.peer
                                                                                                          .to_string(),
                                                                                                    message: notice.message } },
                })
            }
            None if !s.is_open() => Some(Resume::Failed { session,
                                                          error: FlowError::SessionEnded { session } }),
            None => None,
        }
    }

    /// Un aviso de error de cualquier sesión despierta al flow aunque espere
    /// en otra.
    fn take_counterparty_error(&self, rt: &mut FlowRuntime<S>) -> Option<Resume> {
        let errored = rt.sessions
                        .values()
                        .find(|s| matches!(s.peek_next(), Some(SessionBody::Error(_))))
                        .map(|s| s.id)?;
        self.take_message(rt, errored)
    }

    fn persist(&self, rt: &mut FlowRuntime<S>, status: FlowStatus) -> Result<(), FlowError> {
        rt.status = status;
        let cp = rt.to_checkpoint(self.clock.now())?;
        self.checkpoints.put(&cp)?;
        if let Some(mut info) = self.infos.get_mut(&rt.id) {
            *info = rt.info();
        }
        Ok(())
    }

    /// Transmite todo lo encolado. Un fallo de envío no es fatal: el mensaje
    /// sigue en el último checkpoint y se retransmite al reiniciar.
    fn flush(&self, rt: &mut FlowRuntime<S>) {
        for session in rt.sessions.values_mut() {
            for pending in std::mem::take(&mut session.pending_outbound) {
                let env = SessionEnvelope { sender: self.identity.clone(),
                                            session_id: session.id,
                                            sequence: pending.sequence,
                                            topic: session.topic.clone(),
                                            body: pending.body };
                if let Err(e) = self.transport.send(&session.peer, &env) {
                    log::warn!("flow.send:failed flow_id={} session={} error={e}", rt.id, session.id);
                }
            }
        }
    }

    fn ack_pending(&self, rt: &mut FlowRuntime<S>) {
        for id in rt.pending_acks.drain(..) {
            self.transport.acknowledge(id);
        }
    }

    fn complete(self: &Arc<Self>, rt: &mut FlowRuntime<S>, result: Value) {
        rt.status = FlowStatus::Completed;
        rt.wait = None;
        for session in rt.sessions.values_mut().filter(|s| s.is_open()) {
            session.queue(SessionBody::End);
            session.state = SessionState::Ended;
        }
        self.flush(rt);
        if let Err(e) = self.checkpoints.delete(rt.id) {
            log::warn!("checkpoint.delete:failed flow_id={} error={e}", rt.id);
        }
        log::info!("flow.complete flow_id={} logic_type={}", rt.id, rt.logic_type);
        self.finish(rt, Ok(result));
    }

    fn fail(self: &Arc<Self>, rt: &mut FlowRuntime<S>, error: FlowError) {
        {
            let mut ctx = FlowContext { flow_id: rt.id,
                                        identity: &self.identity,
                                        services: &*self.services,
                                        sessions: &mut rt.sessions,
                                        progress: &rt.progress,
                                        clock: &*self.clock,
                                        config: &self.config };
            rt.flow.on_failure(&mut ctx, &error);
        }
        log::error!("flow.failed flow_id={} logic_type={} error={error}", rt.id, rt.logic_type);
        rt.error = Some(error.clone());
        rt.wait = None;
        let notice = ErrorNotice { message: error.to_string(),
                                   error: error.clone() };
        for session in rt.sessions.values_mut().filter(|s| s.is_open()) {
            session.queue(SessionBody::Error(notice.clone()));
            session.state = SessionState::Ended;
        }
        if let Err(e) = self.persist(rt, FlowStatus::Failed) {
            log::error!("checkpoint.put:failed flow_id={} error={e}", rt.id);
        }
        self.flush(rt);
        self.finish(rt, Err(error));
    }

    /// Libera todo lo que el flow terminado retenía en memoria.
    fn finish(&self, rt: &mut FlowRuntime<S>, outcome: FlowOutcome) {
        self.ack_pending(rt);
        for session in rt.sessions.values_mut() {
            for id in session.drain_buffered() {
                self.transport.acknowledge(id);
            }
        }
        rt.epoch += 1;
        if let Some(mut info) = self.infos.get_mut(&rt.id) {
            *info = rt.info();
        }
        // Las sesiones siguen en el índice mientras estén en la ventana: una
        // reentrega tardía de su primer mensaje se confirma y descarta en vez
        // de crear otro responder.
        self.trackers.remove(&rt.id);
        self.flows.remove(&rt.id);
        self.publish(rt.id, outcome);
        self.retire(rt.id, rt.sessions.keys().copied().collect());
    }
}
