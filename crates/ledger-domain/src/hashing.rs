//! Serialización canónica + SHA-256.
//!
//! El id de una transacción es el hash de su JSON canónico (claves ordenadas,
//! sin espacios), de modo que dos nodos calculan el mismo id para el mismo
//! contenido independientemente del orden de campos del serializador.
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::DomainError;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&String, String> = map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = tree.into_iter().map(|(k, v)| format!("{}:{}", quote(k), v)).collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

fn quote(s: &str) -> String {
    // Un String siempre serializa; Value::String(..) evita el unwrap.
    Value::String(s.to_string()).to_string()
}

/// SHA-256 de bytes arbitrarios.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// SHA-256 del JSON canónico de `value`.
pub fn sha256_canonical<T: Serialize>(value: &T) -> Result<[u8; 32], DomainError> {
    let json = serde_json::to_value(value)?;
    Ok(sha256(to_canonical_json(&json).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let val = json!({ "b": 2, "a": { "z": [1, null], "c": "x" } });
        assert_eq!(to_canonical_json(&val), "{\"a\":{\"c\":\"x\",\"z\":[1,null]},\"b\":2}");
    }

    #[test]
    fn hash_ignores_field_order() {
        let a = sha256_canonical(&json!({ "x": 1, "y": 2 })).unwrap();
        let b = sha256_canonical(&json!({ "y": 2, "x": 1 })).unwrap();
        assert_eq!(a, b);
    }
}
