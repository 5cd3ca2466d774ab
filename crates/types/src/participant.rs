//! Round membership.

use crate::ParticipantAddr;
use serde::{Deserialize, Serialize};

/// One member of a ceremony round.
///
/// The entry is fixed for the lifetime of the round: the participant list is
/// carried by the initial proposal and never changes afterwards. `addr` is
/// always derived from `verify_key`, never trusted from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Human-readable operator name.
    pub username: String,
    /// Ed25519 verifying key used to authenticate this participant's log
    /// messages.
    #[serde(with = "hex")]
    pub verify_key: Vec<u8>,
    /// Opaque public key material for the threshold cryptosystem.
    #[serde(with = "hex")]
    pub dkg_pub: Vec<u8>,
    /// Derived fingerprint of `verify_key`.
    pub addr: ParticipantAddr,
}

impl Participant {
    pub fn new(username: impl Into<String>, verify_key: Vec<u8>, dkg_pub: Vec<u8>) -> Self {
        let addr = ParticipantAddr::from_verify_key(&verify_key);
        Self {
            username: username.into(),
            verify_key,
            dkg_pub,
            addr,
        }
    }
}
