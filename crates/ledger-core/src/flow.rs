//! Contrato entre el engine y la lógica de un flow.
//!
//! Un flow es una máquina de estados serializable. El engine llama a
//! `resume` con la entrada que lo despertó; el flow avanza y devuelve la
//! siguiente `FlowAction`. Entre dos llamadas el estado del flow se persiste
//! con serde, por lo que toda la información necesaria para continuar debe
//! vivir en sus campos.
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::errors::FlowError;
use crate::messaging::{PeerId, SessionBody};
use crate::progress::ProgressTracker;
use crate::session::{Session, SessionId, SessionTable};
use crate::FlowId;

pub type OperationFuture = Pin<Box<dyn Future<Output = Result<Value, FlowError>> + Send + 'static>>;

/// Mensaje a enviar por una sesión ya abierta.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub session: SessionId,
    pub payload: Vec<u8>,
}

impl Outgoing {
    pub fn new<T: Serialize>(session: SessionId, payload: &T) -> Result<Self, FlowError> {
        Ok(Self { session,
                  payload: serde_json::to_vec(payload)? })
    }
}

/// Lo que el flow pide al engine al terminar un paso.
pub enum FlowAction {
    /// Enviar y continuar (`Resume::Sent`).
    Send { messages: Vec<Outgoing> },
    /// Suspender hasta el siguiente mensaje de `session`.
    Receive { session: SessionId, timeout: Option<Duration> },
    /// Enviar y suspender hasta la respuesta por la misma sesión.
    SendAndReceive { message: Outgoing, timeout: Option<Duration> },
    /// Suspender hasta que termine una operación externa. Debe ser
    /// idempotente: tras un reinicio el flow recibe `OperationInterrupted` y
    /// la vuelve a lanzar.
    Await { operation: OperationFuture },
    Complete { result: Value },
}

impl FlowAction {
    pub fn send<T: Serialize>(session: SessionId, payload: &T) -> Result<Self, FlowError> {
        Ok(FlowAction::Send { messages: vec![Outgoing::new(session, payload)?] })
    }

    pub fn receive(session: SessionId, timeout: Option<Duration>) -> Self {
        FlowAction::Receive { session, timeout }
    }

    pub fn send_and_receive<T: Serialize>(session: SessionId,
                                          payload: &T,
                                          timeout: Option<Duration>)
                                          -> Result<Self, FlowError> {
        Ok(FlowAction::SendAndReceive { message: Outgoing::new(session, payload)?,
                                        timeout })
    }

    pub fn await_operation<F>(operation: F) -> Self
        where F: Future<Output = Result<Value, FlowError>> + Send + 'static
    {
        FlowAction::Await { operation: Box::pin(operation) }
    }

    pub fn complete<T: Serialize>(result: &T) -> Result<Self, FlowError> {
        Ok(FlowAction::Complete { result: serde_json::to_value(result)? })
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            FlowAction::Send { .. } => "send",
            FlowAction::Receive { .. } => "receive",
            FlowAction::SendAndReceive { .. } => "send_and_receive",
            FlowAction::Await { .. } => "await",
            FlowAction::Complete { .. } => "complete",
        }
    }
}

/// Entrada con la que se reanuda un flow.
#[derive(Debug)]
pub enum Resume {
    Start,
    Sent,
    Received { session: SessionId, payload: Vec<u8> },
    /// Timeout, error de la contraparte o sesión terminada.
    Failed { session: SessionId, error: FlowError },
    OperationCompleted(Result<Value, FlowError>),
    OperationInterrupted,
}

impl Resume {
    /// Extrae un mensaje tipado; los fallos de sesión se devuelven como error.
    pub fn into_message<T: DeserializeOwned>(self) -> Result<(SessionId, T), FlowError> {
        match self {
            Resume::Received { session, payload } => Ok((session, serde_json::from_slice(&payload)?)),
            Resume::Failed { error, .. } => Err(error),
            other => Err(FlowError::UnexpectedInput(format!("expected a message, got {}", other.kind()))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Resume::Start => "start",
            Resume::Sent => "sent",
            Resume::Received { .. } => "received",
            Resume::Failed { .. } => "failed",
            Resume::OperationCompleted(_) => "operation_completed",
            Resume::OperationInterrupted => "operation_interrupted",
        }
    }
}

/// Contexto por invocación: identidad, servicios, sesiones, progreso y reloj.
pub struct FlowContext<'a, S> {
    pub(crate) flow_id: FlowId,
    pub(crate) identity: &'a PeerId,
    pub(crate) services: &'a S,
    pub(crate) sessions: &'a mut SessionTable,
    pub(crate) progress: &'a ProgressTracker,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) config: &'a EngineConfig,
}

impl<'a, S> FlowContext<'a, S> {
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn our_identity(&self) -> &PeerId {
        self.identity
    }

    pub fn services(&self) -> &S {
        self.services
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn progress_to(&self, step: &str) -> Result<(), FlowError> {
        log::debug!("flow.progress flow_id={} step={step}", self.flow_id);
        self.progress.set_current(step)
    }

    /// Abre una sesión con `peer`. El primer mensaje enviado por ella lleva
    /// `topic`, que el nodo remoto usa para elegir el responder.
    pub fn initiate_session(&mut self, peer: PeerId, topic: &str) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(id, Session::new(id, peer, topic, true));
        id
    }

    pub fn counterparty(&self, session: SessionId) -> Option<&PeerId> {
        self.sessions.get(&session).map(|s| &s.peer)
    }

    /// Cierra la sesión desde este lado (envía `End` al confirmar el paso).
    pub fn end_session(&mut self, session: SessionId) -> Result<(), FlowError> {
        let s = self.sessions.get_mut(&session).ok_or(FlowError::UnknownSession(session))?;
        if s.is_open() {
            s.queue(SessionBody::End);
            s.state = crate::session::SessionState::Ended;
        }
        Ok(())
    }
}

pub trait FlowLogic<S>: Send + 'static {
    /// Pasos de progreso declarados, en orden.
    fn progress_steps(&self) -> &'static [&'static str] {
        &[]
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_, S>, input: Resume) -> Result<FlowAction, FlowError>;

    /// Se invoca una vez cuando el flow termina en error (incluido abort),
    /// antes de persistir el fallo.
    fn on_failure(&mut self, _ctx: &mut FlowContext<'_, S>, _error: &FlowError) {}
}

/// Flow que se arranca localmente a partir de argumentos.
pub trait InitiatingFlow<S>: FlowLogic<S> + Serialize + DeserializeOwned + Sized {
    const LOGIC_TYPE: &'static str;
    type Args: DeserializeOwned;

    fn from_args(args: Self::Args) -> Result<Self, FlowError>;
}

/// Flow que se instancia cuando llega el primer mensaje de una sesión con
/// topic `INITIATED_BY`.
pub trait ResponderFlow<S>: FlowLogic<S> + Serialize + DeserializeOwned + Sized {
    const LOGIC_TYPE: &'static str;
    const INITIATED_BY: &'static str;

    fn on_initiated(session: SessionId, counterparty: &PeerId) -> Self;
}

/// Vista borrada de un flow concreto, con su serialización.
pub(crate) trait ErasedFlow<S>: Send {
    fn progress_steps(&self) -> &'static [&'static str];
    fn resume(&mut self, ctx: &mut FlowContext<'_, S>, input: Resume) -> Result<FlowAction, FlowError>;
    fn on_failure(&mut self, ctx: &mut FlowContext<'_, S>, error: &FlowError);
    fn snapshot(&self) -> Result<String, FlowError>;
}

impl<S, F> ErasedFlow<S> for F where F: FlowLogic<S> + Serialize
{
    fn progress_steps(&self) -> &'static [&'static str] {
        FlowLogic::progress_steps(self)
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_, S>, input: Resume) -> Result<FlowAction, FlowError> {
        FlowLogic::resume(self, ctx, input)
    }

    fn on_failure(&mut self, ctx: &mut FlowContext<'_, S>, error: &FlowError) {
        FlowLogic::on_failure(self, ctx, error)
    }

    fn snapshot(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string(self)?)
    }
}
