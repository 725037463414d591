//! Transporte de mensajes entre nodos.
//!
//! El engine sólo necesita entrega al-menos-una-vez con acuse explícito: un
//! mensaje recibido se reenvía (tras reconectar) hasta que el receptor lo
//! confirma con `acknowledge`, lo que ocurre después de persistir su efecto.
mod envelope;
mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::TransportError;

pub use envelope::{ErrorNotice, SessionBody, SessionEnvelope};
pub use memory::{InMemoryEndpoint, InMemoryNetwork};

/// Nombre de un nodo en la red.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(name: impl Into<String>) -> Self {
        PeerId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type MessageId = u64;

/// Mensaje entregado por el transporte, aún sin decodificar.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub bytes: Vec<u8>,
}

pub trait MessagingService: Send + Sync {
    fn identity(&self) -> &PeerId;

    fn send(&self, to: &PeerId, envelope: &SessionEnvelope) -> Result<(), TransportError>;

    /// Confirma que el efecto del mensaje ya es durable; no se reenviará.
    fn acknowledge(&self, id: MessageId);

    /// Conecta el endpoint. Los mensajes pendientes de acuse se reentregan en
    /// orden de llegada.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<InboundMessage>, TransportError>;

    fn close(&self);
}
