//! DKG phase: commit → deal → response → master-key sub-phases.
//!
//! Each sub-phase collects exactly one contribution from every participant,
//! keyed by sender address. A sub-phase advances only when all N
//! contributions are in and verify; a failed verification emits a
//! `ReinitDkg` operation for the operator and leaves the stage where it is -
//! the round is never restarted automatically.

use custodia_core::{DispatchError, Effect};
use custodia_crypto::{Commitments, DealBundle, MasterPublicKey, ResponseBundle};
use custodia_types::{
    DkgCommitsRequest, DkgDealsRequest, DkgMasterKeyRequest, DkgResponsesRequest, EventKind,
    OperationKind, Participant, ParticipantAddr, ReinitDkgNotice,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sub-phase of the DKG exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DkgStage {
    AwaitingCommits,
    AwaitingDeals,
    AwaitingResponses,
    AwaitingMasterKeys,
    Completed,
}

/// State of the DKG phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgState {
    pub participants: Vec<Participant>,
    pub threshold: u16,
    pub stage: DkgStage,
    pub commits: BTreeMap<ParticipantAddr, Vec<u8>>,
    pub deals: BTreeMap<ParticipantAddr, Vec<u8>>,
    pub responses: BTreeMap<ParticipantAddr, Vec<u8>>,
    pub master_keys: BTreeMap<ParticipantAddr, Vec<u8>>,
}

impl DkgState {
    /// Enter the DKG phase after every participant confirmed.
    ///
    /// Returns the entry effects: the `DkgCommits` operation for the local
    /// operator, when this node is a participant.
    pub fn enter(
        participants: Vec<Participant>,
        threshold: u16,
        local_addr: &ParticipantAddr,
    ) -> (Self, Vec<Effect>) {
        let state = Self {
            participants,
            threshold,
            stage: DkgStage::AwaitingCommits,
            commits: BTreeMap::new(),
            deals: BTreeMap::new(),
            responses: BTreeMap::new(),
            master_keys: BTreeMap::new(),
        };
        let mut effects = Vec::new();
        if state.is_participant(local_addr) {
            let request = DkgCommitsRequest {
                threshold: state.threshold,
                participants: state.participants.len() as u16,
            };
            effects.push(Effect::QueueOperation {
                kind: OperationKind::DkgCommits,
                payload: serde_json::to_vec(&request)
                    .expect("payload serialization is infallible"),
                to: vec![],
                extra: None,
            });
        }
        (state, effects)
    }

    pub fn stage_name(&self) -> &'static str {
        match self.stage {
            DkgStage::AwaitingCommits => "dkg:awaiting_commits",
            DkgStage::AwaitingDeals => "dkg:awaiting_deals",
            DkgStage::AwaitingResponses => "dkg:awaiting_responses",
            DkgStage::AwaitingMasterKeys => "dkg:awaiting_master_keys",
            DkgStage::Completed => "dkg:completed",
        }
    }

    pub fn is_participant(&self, addr: &ParticipantAddr) -> bool {
        self.participants.iter().any(|p| &p.addr == addr)
    }

    pub fn is_complete(&self) -> bool {
        self.stage == DkgStage::Completed
    }

    /// The joint public key every participant agreed on, once complete.
    pub fn agreed_master_key(&self) -> Option<&[u8]> {
        if self.is_complete() {
            self.master_keys.values().next().map(Vec::as_slice)
        } else {
            None
        }
    }

    fn n(&self) -> usize {
        self.participants.len()
    }

    /// Store one contribution for the current sub-phase.
    ///
    /// Rejects out-of-order sub-phase messages and duplicate `(sub-phase,
    /// sender)` contributions.
    fn collect(
        &mut self,
        expected: DkgStage,
        kind: EventKind,
        sender: &ParticipantAddr,
        bytes: Vec<u8>,
    ) -> Result<bool, DispatchError> {
        if self.stage != expected {
            return Err(DispatchError::UnexpectedEvent {
                state: self.stage_name(),
                kind,
            });
        }
        if !self.is_participant(sender) {
            return Err(DispatchError::UnauthorizedSender {
                sender: sender.clone(),
            });
        }
        let n = self.participants.len();
        let state_name = self.stage_name();
        let map = match expected {
            DkgStage::AwaitingCommits => &mut self.commits,
            DkgStage::AwaitingDeals => &mut self.deals,
            DkgStage::AwaitingResponses => &mut self.responses,
            DkgStage::AwaitingMasterKeys => &mut self.master_keys,
            DkgStage::Completed => unreachable!("completed stage collects nothing"),
        };
        if map.contains_key(sender) {
            return Err(DispatchError::UnexpectedEvent {
                state: state_name,
                kind,
            });
        }
        map.insert(sender.clone(), bytes);
        Ok(map.len() == n)
    }

    fn reinit_effect(&self, reason: String, offenders: Vec<ParticipantAddr>) -> Effect {
        tracing::warn!(%reason, ?offenders, "DKG cannot advance, queueing reinit operation");
        let notice = ReinitDkgNotice { reason, offenders };
        Effect::QueueOperation {
            kind: OperationKind::ReinitDkg,
            payload: serde_json::to_vec(&notice).expect("payload serialization is infallible"),
            to: vec![],
            extra: Some(notice.reason),
        }
    }

    pub fn on_commits(
        &mut self,
        sender: &ParticipantAddr,
        commitments: Vec<u8>,
        local_addr: &ParticipantAddr,
    ) -> Result<Vec<Effect>, DispatchError> {
        let full = self.collect(
            DkgStage::AwaitingCommits,
            EventKind::DkgCommits,
            sender,
            commitments,
        )?;
        if !full {
            return Ok(vec![]);
        }

        let mut offenders = Vec::new();
        for (addr, bytes) in &self.commits {
            match Commitments::from_bytes(bytes) {
                Ok(c) if c.count() == self.threshold as usize => {}
                _ => offenders.push(addr.clone()),
            }
        }
        if !offenders.is_empty() {
            return Ok(vec![
                self.reinit_effect("malformed DKG commitments".into(), offenders)
            ]);
        }

        self.stage = DkgStage::AwaitingDeals;
        let mut effects = Vec::new();
        if self.is_participant(local_addr) {
            let request = DkgDealsRequest {
                commitments: self.commits.clone(),
            };
            effects.push(Effect::QueueOperation {
                kind: OperationKind::DkgDeals,
                payload: serde_json::to_vec(&request)
                    .expect("payload serialization is infallible"),
                to: vec![],
                extra: None,
            });
        }
        Ok(effects)
    }

    pub fn on_deals(
        &mut self,
        sender: &ParticipantAddr,
        deals: Vec<u8>,
        local_addr: &ParticipantAddr,
    ) -> Result<Vec<Effect>, DispatchError> {
        let full = self.collect(DkgStage::AwaitingDeals, EventKind::DkgDeals, sender, deals)?;
        if !full {
            return Ok(vec![]);
        }

        let n = self.n();
        let mut offenders = Vec::new();
        for (addr, bytes) in &self.deals {
            let ok = match DealBundle::from_bytes(bytes) {
                Ok(bundle) => {
                    bundle.len() == n && bundle.recipients().all(|index| (index as usize) < n)
                }
                Err(_) => false,
            };
            if !ok {
                offenders.push(addr.clone());
            }
        }
        if !offenders.is_empty() {
            return Ok(vec![
                self.reinit_effect("malformed DKG deal bundle".into(), offenders)
            ]);
        }

        self.stage = DkgStage::AwaitingResponses;
        let mut effects = Vec::new();
        if self.is_participant(local_addr) {
            let request = DkgResponsesRequest {
                commitments: self.commits.clone(),
                deals: self.deals.clone(),
            };
            effects.push(Effect::QueueOperation {
                kind: OperationKind::DkgResponses,
                payload: serde_json::to_vec(&request)
                    .expect("payload serialization is infallible"),
                to: vec![],
                extra: None,
            });
        }
        Ok(effects)
    }

    pub fn on_responses(
        &mut self,
        sender: &ParticipantAddr,
        responses: Vec<u8>,
        local_addr: &ParticipantAddr,
    ) -> Result<Vec<Effect>, DispatchError> {
        let full = self.collect(
            DkgStage::AwaitingResponses,
            EventKind::DkgResponses,
            sender,
            responses,
        )?;
        if !full {
            return Ok(vec![]);
        }

        let n = self.n();
        let mut malformed = Vec::new();
        let mut rejected_dealers = Vec::new();
        for (addr, bytes) in &self.responses {
            match ResponseBundle::from_bytes(bytes) {
                Ok(bundle) if bundle.len() == n => {
                    for index in bundle.rejected() {
                        if let Some(dealer) = self.participants.get(index as usize) {
                            rejected_dealers.push(dealer.addr.clone());
                        }
                    }
                }
                _ => malformed.push(addr.clone()),
            }
        }
        if !malformed.is_empty() {
            return Ok(vec![
                self.reinit_effect("malformed DKG response bundle".into(), malformed)
            ]);
        }
        if !rejected_dealers.is_empty() {
            rejected_dealers.sort();
            rejected_dealers.dedup();
            return Ok(vec![self.reinit_effect(
                "deal verification failed".into(),
                rejected_dealers,
            )]);
        }

        self.stage = DkgStage::AwaitingMasterKeys;
        let mut effects = Vec::new();
        if self.is_participant(local_addr) {
            let request = DkgMasterKeyRequest {
                commitments: self.commits.clone(),
            };
            effects.push(Effect::QueueOperation {
                kind: OperationKind::DkgMasterKey,
                payload: serde_json::to_vec(&request)
                    .expect("payload serialization is infallible"),
                to: vec![],
                extra: None,
            });
        }
        Ok(effects)
    }

    pub fn on_master_key(
        &mut self,
        sender: &ParticipantAddr,
        master_key: Vec<u8>,
    ) -> Result<Vec<Effect>, DispatchError> {
        let full = self.collect(
            DkgStage::AwaitingMasterKeys,
            EventKind::DkgMasterKey,
            sender,
            master_key,
        )?;
        if !full {
            return Ok(vec![]);
        }

        // Every broadcast key must decode and match the key implied by the
        // collected commitments.
        let expected = self
            .commits
            .values()
            .map(|bytes| Commitments::from_bytes(bytes))
            .collect::<Result<Vec<_>, _>>()
            .ok()
            .and_then(|all| MasterPublicKey::from_commitments(all.iter()).ok())
            .map(|key| key.to_bytes());

        let mut offenders = Vec::new();
        for (addr, bytes) in &self.master_keys {
            let ok = MasterPublicKey::from_bytes(bytes).is_ok()
                && expected.as_deref() == Some(bytes.as_slice());
            if !ok {
                offenders.push(addr.clone());
            }
        }
        if !offenders.is_empty() {
            return Ok(vec![self.reinit_effect(
                "master key disagreement".into(),
                offenders,
            )]);
        }

        self.stage = DkgStage::Completed;
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_crypto::DkgSecret;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const N: u16 = 3;
    const T: u16 = 2;

    fn participants() -> Vec<Participant> {
        (1..=N as u8)
            .map(|seed| Participant::new(format!("user{seed}"), vec![seed; 32], vec![seed; 96]))
            .collect()
    }

    fn addr(seed: u8) -> ParticipantAddr {
        ParticipantAddr::from_verify_key(&[seed; 32])
    }

    struct Fixture {
        state: DkgState,
        secrets: Vec<DkgSecret>,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(99);
        let (state, effects) = DkgState::enter(participants(), T, &addr(1));
        assert_eq!(effects.len(), 1, "entering DKG queues the commits op");
        let secrets = (0..N)
            .map(|_| DkgSecret::generate(T, &mut rng).unwrap())
            .collect();
        Fixture { state, secrets }
    }

    fn feed_commits(fx: &mut Fixture) {
        for seed in 1..=N as u8 {
            let bytes = fx.secrets[(seed - 1) as usize].commitments().to_bytes();
            fx.state.on_commits(&addr(seed), bytes, &addr(1)).unwrap();
        }
    }

    fn feed_deals(fx: &mut Fixture) {
        for seed in 1..=N as u8 {
            let bytes = fx.secrets[(seed - 1) as usize].deal_bundle(N).to_bytes();
            fx.state.on_deals(&addr(seed), bytes, &addr(1)).unwrap();
        }
    }

    fn feed_responses(fx: &mut Fixture) {
        let all_ok = ResponseBundle::new((0..u32::from(N)).map(|i| (i, true)).collect());
        for seed in 1..=N as u8 {
            fx.state
                .on_responses(&addr(seed), all_ok.to_bytes(), &addr(1))
                .unwrap();
        }
    }

    fn master_key(fx: &Fixture) -> Vec<u8> {
        let commits: Vec<Commitments> = fx.secrets.iter().map(|s| s.commitments()).collect();
        MasterPublicKey::from_commitments(commits.iter())
            .unwrap()
            .to_bytes()
    }

    #[test]
    fn full_ceremony_reaches_completed() {
        let mut fx = fixture();
        feed_commits(&mut fx);
        assert_eq!(fx.state.stage, DkgStage::AwaitingDeals);
        feed_deals(&mut fx);
        assert_eq!(fx.state.stage, DkgStage::AwaitingResponses);
        feed_responses(&mut fx);
        assert_eq!(fx.state.stage, DkgStage::AwaitingMasterKeys);

        let key = master_key(&fx);
        for seed in 1..=N as u8 {
            fx.state.on_master_key(&addr(seed), key.clone()).unwrap();
        }
        assert!(fx.state.is_complete());
        assert_eq!(fx.state.agreed_master_key(), Some(key.as_slice()));
    }

    #[test]
    fn duplicate_contribution_is_rejected() {
        let mut fx = fixture();
        let bytes = fx.secrets[0].commitments().to_bytes();
        fx.state.on_commits(&addr(1), bytes.clone(), &addr(1)).unwrap();
        assert!(matches!(
            fx.state.on_commits(&addr(1), bytes, &addr(1)),
            Err(DispatchError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn out_of_order_sub_phase_is_rejected() {
        let mut fx = fixture();
        let deals = fx.secrets[0].deal_bundle(N).to_bytes();
        assert!(matches!(
            fx.state.on_deals(&addr(1), deals, &addr(1)),
            Err(DispatchError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn stranger_contribution_is_unauthorized() {
        let mut fx = fixture();
        let bytes = fx.secrets[0].commitments().to_bytes();
        assert!(matches!(
            fx.state.on_commits(&addr(9), bytes, &addr(1)),
            Err(DispatchError::UnauthorizedSender { .. })
        ));
    }

    #[test]
    fn malformed_commitment_queues_reinit_and_stays() {
        let mut fx = fixture();
        for seed in 1..=N as u8 {
            let bytes = if seed == 2 {
                vec![0u8; 10]
            } else {
                fx.secrets[(seed - 1) as usize].commitments().to_bytes()
            };
            let effects = fx.state.on_commits(&addr(seed), bytes, &addr(1)).unwrap();
            if seed == N as u8 {
                assert!(matches!(
                    effects.as_slice(),
                    [Effect::QueueOperation {
                        kind: OperationKind::ReinitDkg,
                        ..
                    }]
                ));
            }
        }
        assert_eq!(fx.state.stage, DkgStage::AwaitingCommits);
    }

    #[test]
    fn rejected_deal_queues_reinit_with_offender() {
        let mut fx = fixture();
        feed_commits(&mut fx);
        feed_deals(&mut fx);

        // Participant 2 rejects dealer 0.
        let mut effects = Vec::new();
        for seed in 1..=N as u8 {
            let verdicts =
                ResponseBundle::new((0..u32::from(N)).map(|i| (i, !(seed == 2 && i == 0))).collect());
            effects = fx
                .state
                .on_responses(&addr(seed), verdicts.to_bytes(), &addr(1))
                .unwrap();
        }
        match effects.as_slice() {
            [Effect::QueueOperation {
                kind: OperationKind::ReinitDkg,
                payload,
                ..
            }] => {
                let notice: ReinitDkgNotice = serde_json::from_slice(payload).unwrap();
                assert_eq!(notice.offenders, vec![fx.state.participants[0].addr.clone()]);
            }
            other => panic!("expected reinit operation, got {other:?}"),
        }
        assert_eq!(fx.state.stage, DkgStage::AwaitingResponses);
    }

    #[test]
    fn master_key_disagreement_queues_reinit() {
        let mut fx = fixture();
        feed_commits(&mut fx);
        feed_deals(&mut fx);
        feed_responses(&mut fx);

        let key = master_key(&fx);
        let mut rng = StdRng::seed_from_u64(1);
        let wrong = DkgSecret::generate(1, &mut rng)
            .unwrap()
            .commitments()
            .to_bytes();
        // First point of a commitment encoding is a valid G2 point.
        let wrong_key = wrong[4..].to_vec();

        fx.state.on_master_key(&addr(1), key.clone()).unwrap();
        fx.state.on_master_key(&addr(2), wrong_key).unwrap();
        let effects = fx.state.on_master_key(&addr(3), key).unwrap();
        assert!(matches!(
            effects.as_slice(),
            [Effect::QueueOperation {
                kind: OperationKind::ReinitDkg,
                ..
            }]
        ));
        assert!(!fx.state.is_complete());
    }
}
