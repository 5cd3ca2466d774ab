//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fingerprint bytes taken from the blake3 digest of a verifying key.
pub const ADDR_FINGERPRINT_LEN: usize = 20;

/// Identifier of one full ceremony round.
///
/// Opaque to the node; assigned by the proposer and carried on every log
/// message belonging to the round.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DkgRoundId(pub String);

impl DkgRoundId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DkgRoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DkgRoundId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of one signing batch within a round.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningId(pub String);

impl SigningId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SigningId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SigningId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Address of a participant: the hex-encoded truncated blake3 fingerprint of
/// their ed25519 verifying key.
///
/// Addresses are stable for the lifetime of a round and order
/// lexicographically, which is the tie-break order used when selecting
/// partial signatures for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantAddr(String);

impl ParticipantAddr {
    /// Derive the address from raw ed25519 verifying key bytes.
    pub fn from_verify_key(verify_key: &[u8]) -> Self {
        let digest = blake3::hash(verify_key);
        Self(hex::encode(&digest.as_bytes()[..ADDR_FINGERPRINT_LEN]))
    }

    /// Wrap an already-derived address (e.g. read back from the store).
    pub fn from_hex_unchecked(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ParticipantAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_is_deterministic() {
        let key = [7u8; 32];
        let a = ParticipantAddr::from_verify_key(&key);
        let b = ParticipantAddr::from_verify_key(&key);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), ADDR_FINGERPRINT_LEN * 2);
    }

    #[test]
    fn addr_differs_per_key() {
        let a = ParticipantAddr::from_verify_key(&[1u8; 32]);
        let b = ParticipantAddr::from_verify_key(&[2u8; 32]);
        assert_ne!(a, b);
    }
}
