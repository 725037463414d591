//! Primitivas criptográficas: hashes SHA-256 y claves/firmas ed25519.
//!
//! Todos los valores binarios se serializan como hex para que los registros
//! (checkpoints, mensajes, commit log) sean legibles.
use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DomainError;
use crate::hashing::sha256;

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], DomainError> {
    let bytes = hex::decode(s).map_err(|e| DomainError::Encoding(e.to_string()))?;
    bytes.try_into()
         .map_err(|b: Vec<u8>| DomainError::Encoding(format!("expected {N} bytes, got {}", b.len())))
}

macro_rules! hex_serde {
    ($ty:ident, $len:expr) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                decode_fixed::<$len>(&s).map($ty).map_err(D::Error::custom)
            }
        }
    };
}

/// Hash SHA-256 (id de transacción, referencia a estados).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecureHash(pub [u8; 32]);
hex_serde!(SecureHash, 32);

impl SecureHash {
    pub fn sha256(bytes: &[u8]) -> Self {
        SecureHash(sha256(bytes))
    }

    pub fn zero() -> Self {
        SecureHash([0u8; 32])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, DomainError> {
        decode_fixed::<32>(s).map(SecureHash)
    }

    /// Prefijo corto para logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureHash({})", self.short())
    }
}

/// Clave pública ed25519.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);
hex_serde!(PublicKey, 32);

impl PublicKey {
    pub fn verify(&self, message: &[u8], signature: &DigitalSignature) -> Result<(), DomainError> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| DomainError::InvalidSignature(self.to_string()))?;
        let sig = Signature::from_bytes(&signature.0);
        key.verify(message, &sig).map_err(|_| DomainError::InvalidSignature(self.to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

/// Firma ed25519 (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DigitalSignature(pub [u8; 64]);
hex_serde!(DigitalSignature, 64);

impl fmt::Debug for DigitalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DigitalSignature({}..)", hex::encode(&self.0[..6]))
    }
}

/// Par de claves de un nodo. No es serializable: la clave privada nunca viaja
/// ni se persiste en checkpoints.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self { signing: SigningKey::generate(&mut OsRng) }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { signing: SigningKey::from_bytes(&seed) }
    }

    /// Clave determinista derivada de un nombre. Útil para nodos de demo y
    /// tests que deben conservar su identidad tras un reinicio.
    pub fn from_name(name: &str) -> Self {
        Self::from_seed(sha256(name.as_bytes()))
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// ed25519 es determinista: la misma clave sobre el mismo mensaje produce
    /// siempre la misma firma.
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature(self.signing.sign(message).to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.public())
    }
}
