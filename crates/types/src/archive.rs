//! Signature archive records.

use crate::{DkgRoundId, ParticipantAddr, SigningId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable record of one signing batch, written when the batch completes and
/// kept for audit and replay-safety.
///
/// Retention is operator policy; the node never prunes the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningEntry {
    pub round_id: DkgRoundId,
    pub signing_id: SigningId,
    /// The externally supplied payload that was signed.
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    /// Addresses whose partials contributed to the final signature, in the
    /// lexicographic order they were selected.
    pub participants: Vec<ParticipantAddr>,
    /// Every valid partial collected for the batch.
    pub partial_signatures: BTreeMap<ParticipantAddr, Vec<u8>>,
    /// The aggregated threshold signature, present once the batch completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_signature: Option<Vec<u8>>,
}

impl SigningEntry {
    /// The store key under the `sig/` namespace: `<round>/<signing_id>`.
    pub fn archive_key(round_id: &DkgRoundId, signing_id: &SigningId) -> String {
        format!("{}/{}", round_id, signing_id)
    }
}
