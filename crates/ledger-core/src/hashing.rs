//! Checksum de continuaciones (blake3, hex).
use blake3::Hasher;

pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}
