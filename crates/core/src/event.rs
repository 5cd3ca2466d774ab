//! Event types for the deterministic ceremony state machine.

use crate::DispatchError;
use custodia_types::{
    EventKind, ProposalInitPayload, SigningId, SigningPartialPayload, SigningProposalPayload,
};

/// All possible inputs to a round's state machine.
///
/// Events are **passive data** decoded from log messages; the sender's
/// identity arrives separately (it comes from the message signature, not from
/// the payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    /// Opens the round: the participant list and signing threshold.
    InitProposal(ProposalInitPayload),

    /// The sender confirms joining the round.
    ConfirmProposal,

    /// The sender declines; the round aborts.
    DeclineProposal,

    /// The sender's DKG commitments (opaque façade bytes).
    DkgCommits { commitments: Vec<u8> },

    /// The sender's deal bundle (opaque façade bytes).
    DkgDeals { deals: Vec<u8> },

    /// The sender's per-dealer verdicts (opaque façade bytes).
    DkgResponses { responses: Vec<u8> },

    /// The sender's view of the joint public key.
    DkgMasterKey { master_key: Vec<u8> },

    /// Opens a signing batch over an externally supplied payload.
    SigningProposal {
        signing_id: SigningId,
        payload: Vec<u8>,
    },

    /// The sender's partial signature for an open batch.
    SigningPartial {
        signing_id: SigningId,
        partial: Vec<u8>,
    },
}

impl RoundEvent {
    /// The wire discriminant this event travels under.
    pub fn kind(&self) -> EventKind {
        match self {
            RoundEvent::InitProposal(_) => EventKind::ProposalInit,
            RoundEvent::ConfirmProposal => EventKind::ProposalConfirm,
            RoundEvent::DeclineProposal => EventKind::ProposalDecline,
            RoundEvent::DkgCommits { .. } => EventKind::DkgCommits,
            RoundEvent::DkgDeals { .. } => EventKind::DkgDeals,
            RoundEvent::DkgResponses { .. } => EventKind::DkgResponses,
            RoundEvent::DkgMasterKey { .. } => EventKind::DkgMasterKey,
            RoundEvent::SigningProposal { .. } => EventKind::SigningProposal,
            RoundEvent::SigningPartial { .. } => EventKind::SigningPartial,
        }
    }

    /// Decode a log message's `(event, data)` pair.
    ///
    /// Structural failures surface as [`DispatchError::BadPayload`]; the
    /// cryptographic meaning of opaque artifact bytes is checked later, by
    /// the phase that consumes them.
    pub fn decode(kind: EventKind, data: &[u8]) -> Result<Self, DispatchError> {
        let event = match kind {
            EventKind::ProposalInit => {
                let payload: ProposalInitPayload = serde_json::from_slice(data)
                    .map_err(|e| DispatchError::BadPayload(e.to_string()))?;
                RoundEvent::InitProposal(payload)
            }
            EventKind::ProposalConfirm => RoundEvent::ConfirmProposal,
            EventKind::ProposalDecline => RoundEvent::DeclineProposal,
            EventKind::DkgCommits => RoundEvent::DkgCommits {
                commitments: data.to_vec(),
            },
            EventKind::DkgDeals => RoundEvent::DkgDeals {
                deals: data.to_vec(),
            },
            EventKind::DkgResponses => RoundEvent::DkgResponses {
                responses: data.to_vec(),
            },
            EventKind::DkgMasterKey => RoundEvent::DkgMasterKey {
                master_key: data.to_vec(),
            },
            EventKind::SigningProposal => {
                let payload: SigningProposalPayload = serde_json::from_slice(data)
                    .map_err(|e| DispatchError::BadPayload(e.to_string()))?;
                RoundEvent::SigningProposal {
                    signing_id: payload.signing_id,
                    payload: payload.payload,
                }
            }
            EventKind::SigningPartial => {
                let payload: SigningPartialPayload = serde_json::from_slice(data)
                    .map_err(|e| DispatchError::BadPayload(e.to_string()))?;
                RoundEvent::SigningPartial {
                    signing_id: payload.signing_id,
                    partial: payload.partial,
                }
            }
        };
        Ok(event)
    }

    /// Encode back into a `(kind, data)` pair for an outgoing log message.
    pub fn encode(&self) -> (EventKind, Vec<u8>) {
        let data = match self {
            RoundEvent::InitProposal(payload) => {
                serde_json::to_vec(payload).expect("payload serialization is infallible")
            }
            RoundEvent::ConfirmProposal | RoundEvent::DeclineProposal => Vec::new(),
            RoundEvent::DkgCommits { commitments } => commitments.clone(),
            RoundEvent::DkgDeals { deals } => deals.clone(),
            RoundEvent::DkgResponses { responses } => responses.clone(),
            RoundEvent::DkgMasterKey { master_key } => master_key.clone(),
            RoundEvent::SigningProposal {
                signing_id,
                payload,
            } => serde_json::to_vec(&SigningProposalPayload {
                signing_id: signing_id.clone(),
                payload: payload.clone(),
            })
            .expect("payload serialization is infallible"),
            RoundEvent::SigningPartial {
                signing_id,
                partial,
            } => serde_json::to_vec(&SigningPartialPayload {
                signing_id: signing_id.clone(),
                partial: partial.clone(),
            })
            .expect("payload serialization is infallible"),
        };
        (self.kind(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_types::ProposalParticipant;

    #[test]
    fn decode_encode_round_trips() {
        let events = vec![
            RoundEvent::InitProposal(ProposalInitPayload {
                participants: vec![ProposalParticipant {
                    username: "alice".into(),
                    verify_key: vec![1u8; 32],
                    dkg_pub: vec![2u8; 96],
                }],
                threshold: 2,
            }),
            RoundEvent::ConfirmProposal,
            RoundEvent::DeclineProposal,
            RoundEvent::DkgCommits {
                commitments: vec![9, 9, 9],
            },
            RoundEvent::SigningProposal {
                signing_id: SigningId::from("batch-1"),
                payload: vec![1, 2, 3],
            },
            RoundEvent::SigningPartial {
                signing_id: SigningId::from("batch-1"),
                partial: vec![4, 5],
            },
        ];
        for event in events {
            let (kind, data) = event.encode();
            let decoded = RoundEvent::decode(kind, &data).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn garbage_json_is_bad_payload() {
        let err = RoundEvent::decode(EventKind::ProposalInit, b"not json").unwrap_err();
        assert!(matches!(err, DispatchError::BadPayload(_)));

        let err = RoundEvent::decode(EventKind::SigningProposal, b"{}").unwrap_err();
        assert!(matches!(err, DispatchError::BadPayload(_)));
    }
}
