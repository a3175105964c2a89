//! Relay key generation.

use std::fmt;

use rand::TryRngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// Number of random bytes in a session key (40 hex chars).
pub const KEY_BYTES: usize = 20;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secure random source unavailable: {0}")]
    RandomSource(String),
}

/// Unguessable channel name on the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayKey(String);

impl RelayKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RelayKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Draw `len` bytes from the OS CSPRNG and hex-encode them.
pub fn generate_key(len: usize) -> Result<RelayKey, KeyError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| KeyError::RandomSource(e.to_string()))?;
    Ok(RelayKey(hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_is_lowercase_hex_of_double_length() {
        let key = generate_key(KEY_BYTES).unwrap();
        assert_eq!(key.as_str().len(), KEY_BYTES * 2);
        assert!(
            key.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn test_keys_do_not_repeat() {
        let keys: HashSet<RelayKey> = (0..500).map(|_| generate_key(KEY_BYTES).unwrap()).collect();
        assert_eq!(keys.len(), 500);
    }

    #[test]
    fn test_zero_length_key() {
        assert_eq!(generate_key(0).unwrap().as_str(), "");
    }
}
