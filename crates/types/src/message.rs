//! Log records.

use crate::{DkgRoundId, ParticipantAddr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Discriminant of a log message, serialized as a stable string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventKind {
    /// Opens a round: carries the participant list and threshold.
    ProposalInit,
    /// A participant confirms joining the round.
    ProposalConfirm,
    /// A participant declines; the round aborts.
    ProposalDecline,
    /// A participant's DKG commitments.
    DkgCommits,
    /// A participant's deal bundle (one deal per recipient).
    DkgDeals,
    /// A participant's per-dealer accept/reject verdicts.
    DkgResponses,
    /// A participant's view of the joint public key.
    DkgMasterKey,
    /// Opens a signing batch over an externally supplied payload.
    SigningProposal,
    /// One participant's partial signature for a batch.
    SigningPartial,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProposalInit => "signature_proposal_init",
            EventKind::ProposalConfirm => "signature_proposal_confirm",
            EventKind::ProposalDecline => "signature_proposal_decline",
            EventKind::DkgCommits => "dkg_commits",
            EventKind::DkgDeals => "dkg_deals",
            EventKind::DkgResponses => "dkg_responses",
            EventKind::DkgMasterKey => "dkg_master_key",
            EventKind::SigningProposal => "signing_proposal",
            EventKind::SigningPartial => "signing_partial",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a wire string does not name a known event.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct EventKindParseError(pub String);

impl FromStr for EventKind {
    type Err = EventKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "signature_proposal_init" => EventKind::ProposalInit,
            "signature_proposal_confirm" => EventKind::ProposalConfirm,
            "signature_proposal_decline" => EventKind::ProposalDecline,
            "dkg_commits" => EventKind::DkgCommits,
            "dkg_deals" => EventKind::DkgDeals,
            "dkg_responses" => EventKind::DkgResponses,
            "dkg_master_key" => EventKind::DkgMasterKey,
            "signing_proposal" => EventKind::SigningProposal,
            "signing_partial" => EventKind::SigningPartial,
            other => return Err(EventKindParseError(other.to_owned())),
        })
    }
}

impl TryFrom<String> for EventKind {
    type Error = EventKindParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> String {
        kind.as_str().to_owned()
    }
}

/// One record on the shared append-only log.
///
/// `offset` is assigned by the log transport; the local view is linear and
/// gap-free. `signature` is ed25519 over [`LogMessage::signing_bytes`], and
/// verifiers reject if any covered byte differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub id: Uuid,
    pub dkg_round_id: DkgRoundId,
    pub offset: u64,
    pub event: EventKind,
    #[serde(with = "hex")]
    pub data: Vec<u8>,
    pub sender_addr: ParticipantAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_addr: Option<ParticipantAddr>,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

impl LogMessage {
    /// The byte string covered by `signature`:
    /// `id || dkg_round_id || big-endian(offset) || event || data || sender_addr`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            16 + self.dkg_round_id.as_str().len() + 8 + self.data.len() + 64,
        );
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(self.dkg_round_id.as_str().as_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(self.event.as_str().as_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(self.sender_addr.as_bytes());
        out
    }
}
