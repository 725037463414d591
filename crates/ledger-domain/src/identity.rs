use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

/// Identidad de un participante: nombre legible + clave con la que firma.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self { name: name.into(),
               owning_key }
    }

    pub fn reference(&self, bytes: &[u8]) -> PartyAndReference {
        PartyAndReference { party: self.clone(),
                            reference: OpaqueBytes(bytes.to_vec()) }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Bytes opacos (referencia de emisión), serializados como hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct OpaqueBytes(pub Vec<u8>);

impl Serialize for OpaqueBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for OpaqueBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map(OpaqueBytes).map_err(serde::de::Error::custom)
    }
}

/// Emisor + referencia interna del emisor; identifica quién responde por un
/// activo emitido.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyAndReference {
    pub party: Party,
    pub reference: OpaqueBytes,
}

impl fmt::Display for PartyAndReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.party, hex::encode(&self.reference.0))
    }
}
