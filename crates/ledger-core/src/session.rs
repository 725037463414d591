//! Sesiones: canal ordenado entre un flow local y un flow remoto.
//!
//! Cada lado numera sus envíos; el receptor entrega en orden de secuencia,
//! guarda en buffer lo que llega adelantado y descarta (confirmando) lo ya
//! visto. Sólo la parte numérica de la sesión se persiste; el buffer de
//! entrada se reconstruye con las reentregas del transporte.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messaging::{MessageId, PeerId, SessionBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Open,
    /// La contraparte terminó (End) o falló (Error); ya no habrá más datos.
    Ended,
}

/// Mensaje pendiente de transmitir; se persiste con el checkpoint y se
/// retransmite tras un reinicio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSend {
    pub sequence: u64,
    pub body: SessionBody,
}

#[derive(Debug, Clone)]
pub(crate) struct Buffered {
    pub message_id: MessageId,
    pub body: SessionBody,
}

/// Resultado de ofrecer un mensaje entrante a la sesión.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Offer {
    Buffered,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub peer: PeerId,
    pub topic: String,
    pub initiated_by_us: bool,
    pub next_send_seq: u64,
    pub next_expected_seq: u64,
    pub pending_outbound: Vec<PendingSend>,
    pub state: SessionState,
    #[serde(skip)]
    inbox: BTreeMap<u64, Buffered>,
}

impl Session {
    pub fn new(id: SessionId, peer: PeerId, topic: impl Into<String>, initiated_by_us: bool) -> Self {
        Self { id,
               peer,
               topic: topic.into(),
               initiated_by_us,
               next_send_seq: 0,
               next_expected_seq: 0,
               pending_outbound: Vec::new(),
               state: SessionState::Open,
               inbox: BTreeMap::new() }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Encola un envío asignándole el siguiente número de secuencia.
    pub fn queue(&mut self, body: SessionBody) -> u64 {
        let sequence = self.next_send_seq;
        self.next_send_seq += 1;
        self.pending_outbound.push(PendingSend { sequence, body });
        sequence
    }

    pub(crate) fn offer(&mut self, sequence: u64, message_id: MessageId, body: SessionBody) -> Offer {
        if sequence < self.next_expected_seq || self.inbox.contains_key(&sequence) {
            return Offer::Duplicate;
        }
        self.inbox.insert(sequence, Buffered { message_id, body });
        Offer::Buffered
    }

    /// Siguiente mensaje en orden, si ya llegó.
    pub(crate) fn take_next(&mut self) -> Option<Buffered> {
        let next = self.inbox.remove(&self.next_expected_seq)?;
        self.next_expected_seq += 1;
        if !matches!(next.body, SessionBody::Data(_)) {
            self.state = SessionState::Ended;
        }
        Some(next)
    }

    pub(crate) fn peek_next(&self) -> Option<&SessionBody> {
        self.inbox.get(&self.next_expected_seq).map(|b| &b.body)
    }

    /// Ids de todo lo que queda en el buffer (para confirmarlos al terminar).
    pub(crate) fn drain_buffered(&mut self) -> Vec<MessageId> {
        std::mem::take(&mut self.inbox).into_values().map(|b| b.message_id).collect()
    }
}

// El buffer de entrada no forma parte de la identidad persistida.
impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
        && self.peer == other.peer
        && self.next_send_seq == other.next_send_seq
        && self.next_expected_seq == other.next_expected_seq
        && self.pending_outbound == other.pending_outbound
        && self.state == other.state
    }
}

/// Tabla de sesiones de un flow.
pub type SessionTable = BTreeMap<SessionId, Session>;
