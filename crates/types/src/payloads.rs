//! Wire payload DTOs.
//!
//! These are the schemas carried in `LogMessage::data` and in operation
//! payloads/results. The FSM is the authoritative schema owner; everything
//! here is plain serde JSON. Opaque threshold-crypto artifacts travel as raw
//! bytes produced by the crypto façade.

use crate::{ParticipantAddr, SigningId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of the participant list carried by `ProposalInit`.
///
/// The address is *not* on the wire; every node derives it from `verify_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalParticipant {
    pub username: String,
    #[serde(with = "hex")]
    pub verify_key: Vec<u8>,
    #[serde(with = "hex")]
    pub dkg_pub: Vec<u8>,
}

/// Data of a `ProposalInit` message, and payload of the `SignatureProposal`
/// operation shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalInitPayload {
    pub participants: Vec<ProposalParticipant>,
    pub threshold: u16,
}

/// Result schema of a `SignatureProposal` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResultPayload {
    pub confirm: bool,
}

/// Payload of a `DkgCommits` operation: the parameters the operator needs to
/// generate their secret polynomial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgCommitsRequest {
    pub threshold: u16,
    pub participants: u16,
}

/// Payload of a `DkgDeals` operation: every participant's commitments, so the
/// operator can produce one deal per recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgDealsRequest {
    pub commitments: BTreeMap<ParticipantAddr, Vec<u8>>,
}

/// Payload of a `DkgResponses` operation: the commitments plus the deals
/// addressed to this node, keyed by dealer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgResponsesRequest {
    pub commitments: BTreeMap<ParticipantAddr, Vec<u8>>,
    pub deals: BTreeMap<ParticipantAddr, Vec<u8>>,
}

/// Payload of a `DkgMasterKey` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgMasterKeyRequest {
    pub commitments: BTreeMap<ParticipantAddr, Vec<u8>>,
}

/// Payload of a `ReinitDkg` operation: why the ceremony cannot advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReinitDkgNotice {
    pub reason: String,
    #[serde(default)]
    pub offenders: Vec<ParticipantAddr>,
}

/// Data of a `SigningProposal` message, and payload of the `SigningProposal`
/// approval operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProposalPayload {
    pub signing_id: SigningId,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
}

/// Result schema of a `SigningProposal` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningResultPayload {
    pub approve: bool,
}

/// Payload of a `SigningPartial` operation: what the operator must sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPartialRequest {
    pub signing_id: SigningId,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
}

/// Data of a `SigningPartial` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPartialPayload {
    pub signing_id: SigningId,
    #[serde(with = "hex")]
    pub partial: Vec<u8>,
}
