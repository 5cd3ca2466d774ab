//! Outer round state machine.

use crate::dkg::DkgState;
use crate::proposal::{ProposalOutcome, ProposalState};
use crate::signing::SigningState;
use custodia_core::{DispatchError, Effect, RoundEvent};
use custodia_types::{DkgRoundId, OperationKind, Participant, ParticipantAddr};
use serde::{Deserialize, Serialize};

/// Top-level phase of a round.
///
/// Each variant owns its inner phase state, so an event that does not belong
/// to the current phase has nothing to pair with: the mismatch is caught once
/// in [`RoundStateMachine::dispatch`] and surfaces as `UnexpectedEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RoundPhase {
    /// Created but not yet initialized; only `InitProposal` is valid here.
    Idle,
    Proposal(ProposalState),
    Dkg(DkgState),
    Signing(SigningState),
    Aborted { reason: String },
}

impl RoundPhase {
    pub fn name(&self) -> &'static str {
        match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Proposal(_) => "signature_proposal",
            RoundPhase::Dkg(state) => state.stage_name(),
            RoundPhase::Signing(_) => "signing",
            RoundPhase::Aborted { .. } => "aborted",
        }
    }
}

/// One round's hierarchical state machine.
///
/// `local_addr` identifies the operator this node serves: operations are only
/// queued when the local participant is part of the round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStateMachine {
    pub round_id: DkgRoundId,
    pub local_addr: ParticipantAddr,
    pub phase: RoundPhase,
}

impl RoundStateMachine {
    pub fn new(round_id: DkgRoundId, local_addr: ParticipantAddr) -> Self {
        Self {
            round_id,
            local_addr,
            phase: RoundPhase::Idle,
        }
    }

    /// Serialize the machine for the store.
    pub fn snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("snapshot serialization is infallible")
    }

    /// Restore a machine from a store snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// The participant list, once the round is initialized.
    pub fn participants(&self) -> Option<&[Participant]> {
        match &self.phase {
            RoundPhase::Idle | RoundPhase::Aborted { .. } => None,
            RoundPhase::Proposal(state) => Some(&state.participants),
            RoundPhase::Dkg(state) => Some(&state.participants),
            RoundPhase::Signing(state) => Some(&state.participants),
        }
    }

    /// The registered ed25519 verifying key of `addr`, if it participates.
    pub fn verify_key_of(&self, addr: &ParticipantAddr) -> Option<&[u8]> {
        self.participants()?
            .iter()
            .find(|p| &p.addr == addr)
            .map(|p| p.verify_key.as_slice())
    }

    /// Apply one event. Pure with respect to the snapshot: persistence and
    /// effect execution belong to the caller.
    ///
    /// Outer transitions happen only when an inner machine reaches its
    /// terminal accept state; errors never transition.
    pub fn dispatch(
        &mut self,
        event: RoundEvent,
        sender: &ParticipantAddr,
    ) -> Result<Vec<Effect>, DispatchError> {
        let local = self.local_addr.clone();
        let round_id = self.round_id.clone();
        let mut next: Option<RoundPhase> = None;

        let effects = match (&mut self.phase, event) {
            (RoundPhase::Idle, RoundEvent::InitProposal(payload)) => {
                let state = ProposalState::from_init(&payload, sender)?;
                let mut effects = Vec::new();
                if state.is_participant(&local) {
                    effects.push(Effect::QueueOperation {
                        kind: OperationKind::SignatureProposal,
                        payload: serde_json::to_vec(&payload)
                            .expect("payload serialization is infallible"),
                        to: vec![],
                        extra: None,
                    });
                }
                next = Some(RoundPhase::Proposal(state));
                effects
            }

            (RoundPhase::Proposal(state), RoundEvent::ConfirmProposal) => {
                match state.on_confirm(sender)? {
                    ProposalOutcome::Collecting => vec![],
                    ProposalOutcome::AllConfirmed => {
                        let (dkg, effects) = DkgState::enter(
                            state.participants.clone(),
                            state.threshold,
                            &local,
                        );
                        next = Some(RoundPhase::Dkg(dkg));
                        effects
                    }
                    ProposalOutcome::Declined => unreachable!("confirm never declines"),
                }
            }
            (RoundPhase::Proposal(state), RoundEvent::DeclineProposal) => {
                state.on_decline(sender)?;
                next = Some(RoundPhase::Aborted {
                    reason: format!("participant {sender} declined"),
                });
                vec![Effect::CancelRoundOperations]
            }

            (RoundPhase::Dkg(state), RoundEvent::DkgCommits { commitments }) => {
                state.on_commits(sender, commitments, &local)?
            }
            (RoundPhase::Dkg(state), RoundEvent::DkgDeals { deals }) => {
                state.on_deals(sender, deals, &local)?
            }
            (RoundPhase::Dkg(state), RoundEvent::DkgResponses { responses }) => {
                state.on_responses(sender, responses, &local)?
            }
            (RoundPhase::Dkg(state), RoundEvent::DkgMasterKey { master_key }) => {
                let effects = state.on_master_key(sender, master_key)?;
                if state.is_complete() {
                    let master = state
                        .agreed_master_key()
                        .expect("completed DKG has an agreed key")
                        .to_vec();
                    next = Some(RoundPhase::Signing(SigningState::new(
                        state.participants.clone(),
                        state.threshold,
                        state.commits.clone(),
                        master,
                    )));
                }
                effects
            }

            (
                RoundPhase::Signing(state),
                RoundEvent::SigningProposal {
                    signing_id,
                    payload,
                },
            ) => state.on_proposal(&round_id, sender, signing_id, payload, &local)?,
            (
                RoundPhase::Signing(state),
                RoundEvent::SigningPartial {
                    signing_id,
                    partial,
                },
            ) => state.on_partial(&round_id, sender, &signing_id, partial)?,

            // Everything else pairs an event with a phase that does not
            // expect it, including InitProposal for an existing round.
            (phase, event) => {
                return Err(DispatchError::UnexpectedEvent {
                    state: phase.name(),
                    kind: event.kind(),
                });
            }
        };

        if let Some(phase) = next {
            self.phase = phase;
        }
        Ok(effects)
    }
}
