use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 of `input`, the form the contents API expects for
/// folder passwords.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
