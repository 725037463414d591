//! Red en memoria para tests y para la demo en un solo proceso.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::messaging::{InboundMessage, MessageId, MessagingService, PeerId, SessionEnvelope};

#[derive(Default)]
struct Mailbox {
    /// Mensajes aún sin acuse, en orden de llegada.
    unacked: IndexMap<MessageId, Vec<u8>>,
    sink: Option<mpsc::UnboundedSender<InboundMessage>>,
}

#[derive(Default)]
struct NetworkState {
    mailboxes: HashMap<PeerId, Mailbox>,
}

/// Red compartida por todos los endpoints de un proceso. Los buzones
/// sobreviven a la desconexión de un endpoint: un nodo que se reinicia y se
/// vuelve a suscribir recibe todo lo que no había confirmado.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, identity: PeerId) -> InMemoryEndpoint {
        InMemoryEndpoint { network: self.clone(),
                           identity }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mensajes pendientes de acuse para `peer`.
    pub fn pending_for(&self, peer: &PeerId) -> usize {
        self.lock().mailboxes.get(peer).map_or(0, |m| m.unacked.len())
    }

    fn deliver(&self, to: &PeerId, bytes: Vec<u8>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        let mailbox = state.mailboxes.entry(to.clone()).or_default();
        mailbox.unacked.insert(id, bytes.clone());
        if let Some(sink) = &mailbox.sink {
            if sink.send(InboundMessage { id, bytes }).is_err() {
                mailbox.sink = None;
            }
        }
    }
}

#[derive(Clone)]
pub struct InMemoryEndpoint {
    network: InMemoryNetwork,
    identity: PeerId,
}

impl MessagingService for InMemoryEndpoint {
    fn identity(&self) -> &PeerId {
        &self.identity
    }

    fn send(&self, to: &PeerId, envelope: &SessionEnvelope) -> Result<(), TransportError> {
        let bytes = envelope.encode()?;
        log::trace!("transport.send from={} to={} session={} seq={}",
                    self.identity,
                    to,
                    envelope.session_id,
                    envelope.sequence);
        self.network.deliver(to, bytes);
        Ok(())
    }

    fn acknowledge(&self, id: MessageId) {
        let mut state = self.network.lock();
        if let Some(mailbox) = state.mailboxes.get_mut(&self.identity) {
            mailbox.unacked.shift_remove(&id);
        }
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<InboundMessage>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.network.lock();
        let mailbox = state.mailboxes.entry(self.identity.clone()).or_default();
        for (id, bytes) in &mailbox.unacked {
            tx.send(InboundMessage { id: *id,
                                     bytes: bytes.clone() })
              .map_err(|_| TransportError::Closed(self.identity.to_string()))?;
        }
        mailbox.sink = Some(tx);
        Ok(rx)
    }

    fn close(&self) {
        let mut state = self.network.lock();
        if let Some(mailbox) = state.mailboxes.get_mut(&self.identity) {
            mailbox.sink = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::SessionBody;
    use crate::session::SessionId;

    fn envelope(seq: u64) -> SessionEnvelope {
        SessionEnvelope { sender: PeerId::new("A"),
                          session_id: SessionId::new(),
                          sequence: seq,
                          topic: "t".into(),
                          body: SessionBody::End }
    }

    #[tokio::test]
    async fn unacked_messages_are_redelivered_on_resubscribe() {
        let net = InMemoryNetwork::new();
        let a = net.endpoint(PeerId::new("A"));
        let b = net.endpoint(PeerId::new("B"));

        a.send(&PeerId::new("B"), &envelope(0)).unwrap();
        a.send(&PeerId::new("B"), &envelope(1)).unwrap();

        let mut rx = b.subscribe().unwrap();
        let first = rx.recv().await.unwrap();
        let _second = rx.recv().await.unwrap();
        b.acknowledge(first.id);
        b.close();
        assert_eq!(net.pending_for(&PeerId::new("B")), 1);

        let mut rx = b.subscribe().unwrap();
        let again = rx.recv().await.unwrap();
        assert_eq!(SessionEnvelope::decode(&again.bytes).unwrap().sequence, 1);
    }
}
