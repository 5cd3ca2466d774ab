//! Signing phase: per-batch proposal → partial signatures → aggregation.

use custodia_core::{DispatchError, Effect};
use custodia_crypto::{
    aggregate, verify_master_signature, verify_partial, Commitments, MasterPublicKey,
    PartialSignature,
};
use custodia_types::{
    EventKind, OperationKind, Participant, ParticipantAddr, SigningEntry, SigningId,
    SigningPartialRequest,
};
use custodia_types::DkgRoundId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of one signing batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Collecting,
    Completed,
}

/// One signing batch: the payload and the valid partials collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningBatch {
    pub payload: Vec<u8>,
    pub partials: BTreeMap<ParticipantAddr, Vec<u8>>,
    pub status: BatchStatus,
}

/// State of the signing phase.
///
/// Carries the DKG outputs needed to verify partials: every participant's
/// commitments and the agreed joint public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningState {
    pub participants: Vec<Participant>,
    pub threshold: u16,
    pub commitments: BTreeMap<ParticipantAddr, Vec<u8>>,
    pub master_public_key: Vec<u8>,
    pub batches: BTreeMap<SigningId, SigningBatch>,
}

impl SigningState {
    pub fn new(
        participants: Vec<Participant>,
        threshold: u16,
        commitments: BTreeMap<ParticipantAddr, Vec<u8>>,
        master_public_key: Vec<u8>,
    ) -> Self {
        Self {
            participants,
            threshold,
            commitments,
            master_public_key,
            batches: BTreeMap::new(),
        }
    }

    pub fn is_participant(&self, addr: &ParticipantAddr) -> bool {
        self.participants.iter().any(|p| &p.addr == addr)
    }

    /// The participant's stable index: its position in the proposal list.
    fn index_of(&self, addr: &ParticipantAddr) -> Option<u32> {
        self.participants
            .iter()
            .position(|p| &p.addr == addr)
            .map(|i| i as u32)
    }

    /// A new batch was proposed on the log.
    pub fn on_proposal(
        &mut self,
        round_id: &DkgRoundId,
        sender: &ParticipantAddr,
        signing_id: SigningId,
        payload: Vec<u8>,
        local_addr: &ParticipantAddr,
    ) -> Result<Vec<Effect>, DispatchError> {
        if !self.is_participant(sender) {
            return Err(DispatchError::UnauthorizedSender {
                sender: sender.clone(),
            });
        }
        if self.batches.contains_key(&signing_id) {
            return Err(DispatchError::UnexpectedEvent {
                state: "signing",
                kind: EventKind::SigningProposal,
            });
        }

        self.batches.insert(
            signing_id.clone(),
            SigningBatch {
                payload: payload.clone(),
                partials: BTreeMap::new(),
                status: BatchStatus::Collecting,
            },
        );

        let mut effects = vec![Effect::Archive {
            entry: SigningEntry {
                round_id: round_id.clone(),
                signing_id: signing_id.clone(),
                payload: payload.clone(),
                participants: vec![],
                partial_signatures: BTreeMap::new(),
                final_signature: None,
            },
        }];
        if self.is_participant(local_addr) {
            let request = SigningPartialRequest {
                signing_id,
                payload,
            };
            effects.push(Effect::QueueOperation {
                kind: OperationKind::SigningPartial,
                payload: serde_json::to_vec(&request)
                    .expect("payload serialization is infallible"),
                to: vec![],
                extra: None,
            });
        }
        Ok(effects)
    }

    /// A partial signature arrived on the log.
    ///
    /// Invalid partials are dropped without effect: the batch simply keeps
    /// collecting until `threshold` valid ones are in. On the threshold-th
    /// valid partial the batch aggregates - the first `threshold` valid
    /// partials in lexicographic sender-address order - verifies the result
    /// against the joint key, and archives it.
    pub fn on_partial(
        &mut self,
        round_id: &DkgRoundId,
        sender: &ParticipantAddr,
        signing_id: &SigningId,
        partial: Vec<u8>,
    ) -> Result<Vec<Effect>, DispatchError> {
        if !self.is_participant(sender) {
            return Err(DispatchError::UnauthorizedSender {
                sender: sender.clone(),
            });
        }
        let sender_index = self
            .index_of(sender)
            .expect("participant membership checked above");
        let threshold = self.threshold as usize;

        let Some(batch) = self.batches.get(signing_id) else {
            return Err(DispatchError::UnexpectedEvent {
                state: "signing",
                kind: EventKind::SigningPartial,
            });
        };
        if batch.status != BatchStatus::Collecting || batch.partials.contains_key(sender) {
            return Err(DispatchError::UnexpectedEvent {
                state: "signing",
                kind: EventKind::SigningPartial,
            });
        }

        // Cryptographic validation: decode, index must match the sender, and
        // the share equation must hold against the round's commitments.
        let payload = batch.payload.clone();
        let valid = match PartialSignature::from_bytes(&partial) {
            Ok(decoded) if decoded.index() == sender_index => {
                match self.decoded_commitments() {
                    Some(commits) => verify_partial(commits.iter(), &payload, &decoded).is_ok(),
                    None => false,
                }
            }
            _ => false,
        };
        if !valid {
            tracing::warn!(
                signing_id = %signing_id,
                sender = %sender,
                "dropping partial signature that failed verification"
            );
            return Ok(vec![]);
        }

        let batch = self
            .batches
            .get_mut(signing_id)
            .expect("batch presence checked above");
        batch.partials.insert(sender.clone(), partial);
        if batch.partials.len() < threshold {
            return Ok(vec![]);
        }

        // Threshold reached: aggregate the first `threshold` valid partials
        // in lexicographic address order.
        let selected: Vec<(ParticipantAddr, PartialSignature)> = batch
            .partials
            .iter()
            .take(threshold)
            .map(|(addr, bytes)| {
                let decoded = PartialSignature::from_bytes(bytes)
                    .expect("stored partials were validated on arrival");
                (addr.clone(), decoded)
            })
            .collect();
        let partials_only: Vec<PartialSignature> =
            selected.iter().map(|(_, p)| p.clone()).collect();

        let master = MasterPublicKey::from_bytes(&self.master_public_key)
            .expect("master key was agreed during DKG");
        let signature = match aggregate(&partials_only) {
            Ok(sig) if verify_master_signature(&master, &payload, &sig).is_ok() => sig,
            _ => {
                tracing::error!(
                    signing_id = %signing_id,
                    "aggregated signature failed verification, keeping batch open"
                );
                return Ok(vec![]);
            }
        };

        let batch = self
            .batches
            .get_mut(signing_id)
            .expect("batch presence checked above");
        batch.status = BatchStatus::Completed;
        let entry = SigningEntry {
            round_id: round_id.clone(),
            signing_id: signing_id.clone(),
            payload,
            participants: selected.iter().map(|(addr, _)| addr.clone()).collect(),
            partial_signatures: batch.partials.clone(),
            final_signature: Some(signature),
        };
        Ok(vec![Effect::Archive { entry }])
    }

    fn decoded_commitments(&self) -> Option<Vec<Commitments>> {
        self.participants
            .iter()
            .map(|p| {
                self.commitments
                    .get(&p.addr)
                    .and_then(|bytes| Commitments::from_bytes(bytes).ok())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_crypto::{partial_sign, DkgSecret, KeyShare};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const N: u16 = 5;
    const T: u16 = 3;

    fn participants() -> Vec<Participant> {
        (1..=N as u8)
            .map(|seed| Participant::new(format!("user{seed}"), vec![seed; 32], vec![seed; 96]))
            .collect()
    }

    fn addr(seed: u8) -> ParticipantAddr {
        ParticipantAddr::from_verify_key(&[seed; 32])
    }

    struct Fixture {
        state: SigningState,
        shares: Vec<KeyShare>,
        round_id: DkgRoundId,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(21);
        let parts = participants();
        let secrets: Vec<DkgSecret> = (0..N)
            .map(|_| DkgSecret::generate(T, &mut rng).unwrap())
            .collect();
        let commitments: BTreeMap<ParticipantAddr, Vec<u8>> = parts
            .iter()
            .zip(&secrets)
            .map(|(p, s)| (p.addr.clone(), s.commitments().to_bytes()))
            .collect();
        let bundles: Vec<_> = secrets.iter().map(|s| s.deal_bundle(N)).collect();
        let shares: Vec<KeyShare> = (0..u32::from(N))
            .map(|index| {
                let deals: Vec<_> = bundles.iter().map(|b| b.deal_for(index).unwrap()).collect();
                KeyShare::assemble(index, deals.iter()).unwrap()
            })
            .collect();
        let all: Vec<Commitments> = secrets.iter().map(|s| s.commitments()).collect();
        let master = MasterPublicKey::from_commitments(all.iter()).unwrap();

        Fixture {
            state: SigningState::new(parts, T, commitments, master.to_bytes()),
            shares,
            round_id: DkgRoundId::from("round-1"),
        }
    }

    fn open_batch(fx: &mut Fixture, id: &str, payload: &[u8]) {
        let effects = fx
            .state
            .on_proposal(
                &fx.round_id.clone(),
                &addr(1),
                SigningId::from(id),
                payload.to_vec(),
                &addr(1),
            )
            .unwrap();
        assert_eq!(effects.len(), 2, "archive entry plus partial op");
    }

    #[test]
    fn batch_completes_on_threshold_partials() {
        let mut fx = fixture();
        let payload = b"rotate withdrawal credentials";
        open_batch(&mut fx, "batch-1", payload);
        let signing_id = SigningId::from("batch-1");

        let mut final_effects = Vec::new();
        for seed in 1..=T as u8 {
            let partial = partial_sign(&fx.shares[(seed - 1) as usize], payload).to_bytes();
            final_effects = fx
                .state
                .on_partial(&fx.round_id.clone(), &addr(seed), &signing_id, partial)
                .unwrap();
        }
        match final_effects.as_slice() {
            [Effect::Archive { entry }] => {
                let sig = entry.final_signature.as_ref().unwrap();
                let master =
                    MasterPublicKey::from_bytes(&fx.state.master_public_key).unwrap();
                verify_master_signature(&master, payload, sig).unwrap();
                assert_eq!(entry.participants.len(), T as usize);
            }
            other => panic!("expected archive effect, got {other:?}"),
        }
        assert_eq!(
            fx.state.batches[&signing_id].status,
            BatchStatus::Completed
        );
    }

    #[test]
    fn tampered_partial_is_dropped_and_next_valid_completes() {
        let mut fx = fixture();
        let payload = b"payload";
        open_batch(&mut fx, "batch-1", payload);
        let signing_id = SigningId::from("batch-1");

        // Two valid partials, then a tampered third: signature over the
        // wrong message.
        for seed in 1..=2u8 {
            let partial = partial_sign(&fx.shares[(seed - 1) as usize], payload).to_bytes();
            fx.state
                .on_partial(&fx.round_id.clone(), &addr(seed), &signing_id, partial)
                .unwrap();
        }
        let tampered = partial_sign(&fx.shares[2], b"other message").to_bytes();
        let effects = fx
            .state
            .on_partial(&fx.round_id.clone(), &addr(3), &signing_id, tampered)
            .unwrap();
        assert!(effects.is_empty(), "tampered partial is silently dropped");
        assert_eq!(
            fx.state.batches[&signing_id].status,
            BatchStatus::Collecting
        );

        // The next valid partial (participant 4) completes the batch.
        let partial = partial_sign(&fx.shares[3], payload).to_bytes();
        let effects = fx
            .state
            .on_partial(&fx.round_id.clone(), &addr(4), &signing_id, partial)
            .unwrap();
        match effects.as_slice() {
            [Effect::Archive { entry }] => {
                let master =
                    MasterPublicKey::from_bytes(&fx.state.master_public_key).unwrap();
                verify_master_signature(&master, payload, entry.final_signature.as_ref().unwrap())
                    .unwrap();
            }
            other => panic!("expected archive effect, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_signing_id_is_rejected() {
        let mut fx = fixture();
        open_batch(&mut fx, "batch-1", b"x");
        let err = fx
            .state
            .on_proposal(
                &fx.round_id.clone(),
                &addr(2),
                SigningId::from("batch-1"),
                b"y".to_vec(),
                &addr(1),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnexpectedEvent { .. }));
    }

    #[test]
    fn partial_for_unknown_batch_is_rejected() {
        let mut fx = fixture();
        let partial = partial_sign(&fx.shares[0], b"m").to_bytes();
        let err = fx
            .state
            .on_partial(
                &fx.round_id.clone(),
                &addr(1),
                &SigningId::from("no-such-batch"),
                partial,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnexpectedEvent { .. }));
    }

    #[test]
    fn partial_with_wrong_index_is_dropped() {
        let mut fx = fixture();
        open_batch(&mut fx, "batch-1", b"m");
        // Participant 2 submits a partial made with participant 1's share.
        let partial = partial_sign(&fx.shares[0], b"m").to_bytes();
        let effects = fx
            .state
            .on_partial(
                &fx.round_id.clone(),
                &addr(2),
                &SigningId::from("batch-1"),
                partial,
            )
            .unwrap();
        assert!(effects.is_empty());
    }
}
