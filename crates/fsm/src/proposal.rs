//! Signature-proposal phase.

use custodia_core::DispatchError;
use custodia_types::{Participant, ParticipantAddr, ProposalInitPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// State while collecting join confirmations.
///
/// Created from the round's `InitProposal`; the participant list and
/// threshold are fixed from that moment on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalState {
    pub participants: Vec<Participant>,
    pub threshold: u16,
    pub confirmed: BTreeSet<ParticipantAddr>,
}

/// What a proposal-phase event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Confirmation recorded, more outstanding.
    Collecting,
    /// Every participant confirmed; the round enters DKG.
    AllConfirmed,
    /// A participant declined; the round aborts.
    Declined,
}

impl ProposalState {
    /// Validate the init payload and build the phase state.
    ///
    /// The sender must be one of the derived participant addresses: the
    /// proposer proposes itself into the round.
    pub fn from_init(
        payload: &ProposalInitPayload,
        sender: &ParticipantAddr,
    ) -> Result<Self, DispatchError> {
        if payload.participants.is_empty() {
            return Err(DispatchError::BadPayload("empty participant list".into()));
        }
        let n = payload.participants.len();
        if n > u16::MAX as usize {
            return Err(DispatchError::BadPayload("participant list too long".into()));
        }
        if payload.threshold == 0 || payload.threshold as usize > n {
            return Err(DispatchError::BadPayload(format!(
                "threshold {} out of range for {} participants",
                payload.threshold, n
            )));
        }

        let mut participants = Vec::with_capacity(n);
        let mut seen_keys = BTreeSet::new();
        let mut seen_names = BTreeSet::new();
        for entry in &payload.participants {
            if entry.verify_key.len() != 32 {
                return Err(DispatchError::BadPayload(format!(
                    "participant {} has a malformed verify key",
                    entry.username
                )));
            }
            if !seen_keys.insert(entry.verify_key.clone()) {
                return Err(DispatchError::BadPayload("duplicate verify key".into()));
            }
            if !seen_names.insert(entry.username.clone()) {
                return Err(DispatchError::BadPayload(format!(
                    "duplicate username {}",
                    entry.username
                )));
            }
            participants.push(Participant::new(
                entry.username.clone(),
                entry.verify_key.clone(),
                entry.dkg_pub.clone(),
            ));
        }

        if !participants.iter().any(|p| &p.addr == sender) {
            return Err(DispatchError::UnauthorizedSender {
                sender: sender.clone(),
            });
        }

        Ok(Self {
            participants,
            threshold: payload.threshold,
            confirmed: BTreeSet::new(),
        })
    }

    pub fn is_participant(&self, addr: &ParticipantAddr) -> bool {
        self.participants.iter().any(|p| &p.addr == addr)
    }

    /// Record one confirmation. Accepted exactly once per participant.
    pub fn on_confirm(&mut self, sender: &ParticipantAddr) -> Result<ProposalOutcome, DispatchError> {
        if !self.is_participant(sender) {
            return Err(DispatchError::UnauthorizedSender {
                sender: sender.clone(),
            });
        }
        if !self.confirmed.insert(sender.clone()) {
            return Err(DispatchError::UnexpectedEvent {
                state: "signature_proposal",
                kind: custodia_types::EventKind::ProposalConfirm,
            });
        }
        if self.confirmed.len() == self.participants.len() {
            Ok(ProposalOutcome::AllConfirmed)
        } else {
            Ok(ProposalOutcome::Collecting)
        }
    }

    /// Record a decline. Any decline aborts the round.
    pub fn on_decline(&mut self, sender: &ParticipantAddr) -> Result<ProposalOutcome, DispatchError> {
        if !self.is_participant(sender) {
            return Err(DispatchError::UnauthorizedSender {
                sender: sender.clone(),
            });
        }
        Ok(ProposalOutcome::Declined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_types::ProposalParticipant;

    fn entry(name: &str, seed: u8) -> ProposalParticipant {
        ProposalParticipant {
            username: name.into(),
            verify_key: vec![seed; 32],
            dkg_pub: vec![seed; 96],
        }
    }

    fn addr_of(seed: u8) -> ParticipantAddr {
        ParticipantAddr::from_verify_key(&[seed; 32])
    }

    fn payload() -> ProposalInitPayload {
        ProposalInitPayload {
            participants: vec![entry("alice", 1), entry("bob", 2), entry("carol", 3)],
            threshold: 2,
        }
    }

    #[test]
    fn init_derives_addresses() {
        let state = ProposalState::from_init(&payload(), &addr_of(1)).unwrap();
        assert_eq!(state.participants.len(), 3);
        assert!(state.is_participant(&addr_of(2)));
        assert!(!state.is_participant(&addr_of(9)));
    }

    #[test]
    fn init_rejects_stranger_proposer() {
        let err = ProposalState::from_init(&payload(), &addr_of(9)).unwrap_err();
        assert!(matches!(err, DispatchError::UnauthorizedSender { .. }));
    }

    #[test]
    fn init_rejects_bad_threshold() {
        let mut p = payload();
        p.threshold = 4;
        assert!(matches!(
            ProposalState::from_init(&p, &addr_of(1)),
            Err(DispatchError::BadPayload(_))
        ));
        p.threshold = 0;
        assert!(matches!(
            ProposalState::from_init(&p, &addr_of(1)),
            Err(DispatchError::BadPayload(_))
        ));
    }

    #[test]
    fn init_rejects_duplicate_keys() {
        let mut p = payload();
        p.participants.push(entry("dave", 1));
        assert!(matches!(
            ProposalState::from_init(&p, &addr_of(1)),
            Err(DispatchError::BadPayload(_))
        ));
    }

    #[test]
    fn confirmations_complete_once_everyone_answered() {
        let mut state = ProposalState::from_init(&payload(), &addr_of(1)).unwrap();
        assert_eq!(state.on_confirm(&addr_of(1)).unwrap(), ProposalOutcome::Collecting);
        assert_eq!(state.on_confirm(&addr_of(2)).unwrap(), ProposalOutcome::Collecting);
        assert_eq!(state.on_confirm(&addr_of(3)).unwrap(), ProposalOutcome::AllConfirmed);
    }

    #[test]
    fn duplicate_confirm_is_rejected() {
        let mut state = ProposalState::from_init(&payload(), &addr_of(1)).unwrap();
        state.on_confirm(&addr_of(2)).unwrap();
        assert!(matches!(
            state.on_confirm(&addr_of(2)),
            Err(DispatchError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn stranger_confirm_is_unauthorized() {
        let mut state = ProposalState::from_init(&payload(), &addr_of(1)).unwrap();
        assert!(matches!(
            state.on_confirm(&addr_of(9)),
            Err(DispatchError::UnauthorizedSender { .. })
        ));
    }
}
