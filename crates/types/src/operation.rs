//! Operator work items.

use crate::{DkgRoundId, ParticipantAddr};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What kind of work an operation asks the operator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Confirm or decline joining a proposed round.
    SignatureProposal,
    /// Produce DKG commitments.
    DkgCommits,
    /// Produce the deal bundle (given everyone's commitments).
    DkgDeals,
    /// Verify the deals addressed to this node and produce verdicts.
    DkgResponses,
    /// Compute the joint public key from the qualified commitments.
    DkgMasterKey,
    /// Approve opening a signing batch over an external payload.
    SigningProposal,
    /// Produce a partial signature for an open batch.
    SigningPartial,
    /// A DKG contribution failed verification; the round needs operator
    /// attention (typically a restart under a new round id).
    ReinitDkg,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::SignatureProposal => "signature_proposal",
            OperationKind::DkgCommits => "dkg_commits",
            OperationKind::DkgDeals => "dkg_deals",
            OperationKind::DkgResponses => "dkg_responses",
            OperationKind::DkgMasterKey => "dkg_master_key",
            OperationKind::SigningProposal => "signing_proposal",
            OperationKind::SigningPartial => "signing_partial",
            OperationKind::ReinitDkg => "reinit_dkg",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending work item requiring operator action.
///
/// Created when an FSM transition needs operator consent or a cryptographic
/// artifact only the operator can produce. Terminates by being answered
/// (`result` supplied and processed) or cancelled (round aborted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub round_id: DkgRoundId,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,
    pub created_at_ms: u64,
    /// Addresses the eventual outgoing message is directed at; empty means
    /// broadcast.
    #[serde(default)]
    pub to: Vec<ParticipantAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl Operation {
    /// Derive a replay-stable operation id.
    ///
    /// Two replays of the same log prefix must synthesize the same queue, so
    /// the id is a digest of the round, kind, and payload rather than a
    /// random uuid.
    pub fn deterministic_id(round_id: &DkgRoundId, kind: OperationKind, payload: &[u8]) -> Uuid {
        let mut hasher = blake3::Hasher::new();
        hasher.update(round_id.as_str().as_bytes());
        hasher.update(kind.as_str().as_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Uuid::from_bytes(bytes)
    }

    pub fn new(
        round_id: DkgRoundId,
        kind: OperationKind,
        payload: Vec<u8>,
        to: Vec<ParticipantAddr>,
        extra: Option<String>,
        created_at_ms: u64,
    ) -> Self {
        let id = Self::deterministic_id(&round_id, kind, &payload);
        Self {
            id,
            kind,
            round_id,
            payload,
            result: None,
            created_at_ms,
            to,
            extra,
        }
    }
}
