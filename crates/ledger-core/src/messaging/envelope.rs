use serde::{Deserialize, Serialize};

use crate::errors::{FlowError, TransportError};
use crate::messaging::PeerId;
use crate::session::SessionId;

/// Aviso de fallo enviado a las contrapartes cuando un flow termina en error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
    pub error: FlowError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionBody {
    Data(Vec<u8>),
    End,
    Error(ErrorNotice),
}

/// Sobre de un mensaje de sesión. `(session_id, sequence)` identifica el
/// mensaje de forma única; el receptor descarta duplicados.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub sender: PeerId,
    pub session_id: SessionId,
    pub sequence: u64,
    /// Topic del flow iniciador; decide qué responder se instancia.
    pub topic: String,
    pub body: SessionBody,
}

impl SessionEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}
