//! Per-round machine cache and factory.

use crate::round::RoundStateMachine;
use custodia_core::{DispatchError, Effect, RoundEvent};
use custodia_types::{DkgRoundId, ParticipantAddr};
use std::collections::HashMap;

/// Cache of active round machines.
///
/// The registry is purely in-memory; the store's snapshots remain the source
/// of truth. The service loads snapshots into the registry on demand and
/// persists the mutated snapshot after every successful dispatch.
#[derive(Debug)]
pub struct RoundRegistry {
    local_addr: ParticipantAddr,
    rounds: HashMap<DkgRoundId, RoundStateMachine>,
}

impl RoundRegistry {
    pub fn new(local_addr: ParticipantAddr) -> Self {
        Self {
            local_addr,
            rounds: HashMap::new(),
        }
    }

    pub fn local_addr(&self) -> &ParticipantAddr {
        &self.local_addr
    }

    pub fn contains(&self, round_id: &DkgRoundId) -> bool {
        self.rounds.contains_key(round_id)
    }

    pub fn get(&self, round_id: &DkgRoundId) -> Option<&RoundStateMachine> {
        self.rounds.get(round_id)
    }

    /// Load a snapshot read back from the store.
    pub fn load_snapshot(
        &mut self,
        round_id: &DkgRoundId,
        snapshot: &[u8],
    ) -> Result<(), serde_json::Error> {
        let machine = RoundStateMachine::from_snapshot(snapshot)?;
        self.rounds.insert(round_id.clone(), machine);
        Ok(())
    }

    /// Dispatch an event into its round.
    ///
    /// A machine is created only for `InitProposal`; any other event for an
    /// unknown round is [`DispatchError::UnknownRound`]. On success, returns
    /// the effects and the new serialized snapshot for the caller to persist.
    pub fn dispatch(
        &mut self,
        round_id: &DkgRoundId,
        event: RoundEvent,
        sender: &ParticipantAddr,
    ) -> Result<(Vec<Effect>, Vec<u8>), DispatchError> {
        let mut created = false;
        if !self.rounds.contains_key(round_id) {
            if !matches!(event, RoundEvent::InitProposal(_)) {
                return Err(DispatchError::UnknownRound(round_id.clone()));
            }
            self.rounds.insert(
                round_id.clone(),
                RoundStateMachine::new(round_id.clone(), self.local_addr.clone()),
            );
            created = true;
        }

        let machine = self
            .rounds
            .get_mut(round_id)
            .expect("round inserted or present above");
        let before = machine.clone();
        match machine.dispatch(event, sender) {
            Ok(effects) => Ok((effects, machine.snapshot())),
            Err(err) => {
                // A failed dispatch must not leave partial mutations behind,
                // and a failed init must not leave an empty machine cached.
                if created {
                    self.rounds.remove(round_id);
                } else {
                    *machine = before;
                }
                Err(err)
            }
        }
    }

    /// The registered verifying key of `addr` within a round, for message
    /// authentication.
    pub fn verify_key(&self, round_id: &DkgRoundId, addr: &ParticipantAddr) -> Option<Vec<u8>> {
        self.rounds
            .get(round_id)?
            .verify_key_of(addr)
            .map(<[u8]>::to_vec)
    }

    /// Iterate `(round_id, phase name)` pairs for the control surface.
    pub fn rounds(&self) -> impl Iterator<Item = (&DkgRoundId, &'static str)> {
        self.rounds.iter().map(|(id, m)| (id, m.phase.name()))
    }

    /// Drop one cached machine so the next load re-reads the store snapshot
    /// (used when a commit fails after a successful dispatch).
    pub fn remove(&mut self, round_id: &DkgRoundId) {
        self.rounds.remove(round_id);
    }

    /// Drop every cached machine (used when rebinding to a fresh store).
    pub fn clear(&mut self) {
        self.rounds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_types::{ProposalInitPayload, ProposalParticipant};

    fn addr(seed: u8) -> ParticipantAddr {
        ParticipantAddr::from_verify_key(&[seed; 32])
    }

    fn init_event() -> RoundEvent {
        RoundEvent::InitProposal(ProposalInitPayload {
            participants: (1..=3u8)
                .map(|seed| ProposalParticipant {
                    username: format!("user{seed}"),
                    verify_key: vec![seed; 32],
                    dkg_pub: vec![seed; 96],
                })
                .collect(),
            threshold: 2,
        })
    }

    #[test]
    fn non_init_event_for_unknown_round_errors() {
        let mut registry = RoundRegistry::new(addr(1));
        let err = registry
            .dispatch(&DkgRoundId::from("nope"), RoundEvent::ConfirmProposal, &addr(1))
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownRound(_)));
    }

    #[test]
    fn init_creates_the_machine() {
        let mut registry = RoundRegistry::new(addr(1));
        let round = DkgRoundId::from("round-1");
        let (effects, snapshot) = registry.dispatch(&round, init_event(), &addr(1)).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(registry.contains(&round));

        // The snapshot loads back into a fresh registry.
        let mut other = RoundRegistry::new(addr(1));
        other.load_snapshot(&round, &snapshot).unwrap();
        assert_eq!(other.get(&round), registry.get(&round));
    }

    #[test]
    fn failed_dispatch_leaves_the_machine_untouched() {
        let mut registry = RoundRegistry::new(addr(1));
        let round = DkgRoundId::from("round-1");
        registry.dispatch(&round, init_event(), &addr(1)).unwrap();
        let before = registry.get(&round).cloned();

        let err = registry
            .dispatch(&round, RoundEvent::ConfirmProposal, &addr(9))
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnauthorizedSender { .. }));
        assert_eq!(registry.get(&round).cloned(), before);
    }

    #[test]
    fn verify_key_resolves_through_the_round() {
        let mut registry = RoundRegistry::new(addr(1));
        let round = DkgRoundId::from("round-1");
        registry.dispatch(&round, init_event(), &addr(1)).unwrap();
        assert_eq!(registry.verify_key(&round, &addr(2)), Some(vec![2u8; 32]));
        assert_eq!(registry.verify_key(&round, &addr(9)), None);
    }
}
