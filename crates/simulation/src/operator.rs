//! Scripted stand-in for the human operator and their air-gapped signer.

use custodia_crypto::{
    partial_sign, Commitments, DealBundle, DkgSecret, KeyShare, MasterPublicKey, ResponseBundle,
};
use custodia_types::{
    DkgCommitsRequest, DkgDealsRequest, DkgMasterKeyRequest, DkgResponsesRequest, DkgRoundId,
    Operation, OperationKind, ParticipantAddr, ProposalInitPayload, ProposalResultPayload,
    SigningPartialRequest, SigningResultPayload,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;

/// How the operator answers a pending operation.
#[derive(Debug)]
pub enum OperatorAnswer {
    /// Use the `approve_participation` specialization.
    Approve,
    /// Submit these result bytes through `process_operation`.
    Result(Vec<u8>),
    /// Leave the operation pending.
    Skip,
}

/// Deterministic operator: holds the secret DKG material the node itself
/// never sees, and produces operation results the way the air-gapped machine
/// would.
pub struct ScriptedOperator {
    local_addr: ParticipantAddr,
    rng: StdRng,
    /// Participant order per round, learned from the proposal payload.
    order: HashMap<DkgRoundId, Vec<ParticipantAddr>>,
    secrets: HashMap<DkgRoundId, DkgSecret>,
    shares: HashMap<DkgRoundId, KeyShare>,
    /// Test hook: decline round proposals instead of confirming.
    pub decline_proposals: bool,
    /// Test hook: produce partial signatures over the wrong message.
    pub tamper_partials: bool,
}

impl ScriptedOperator {
    pub fn new(local_addr: ParticipantAddr, seed: u64) -> Self {
        Self {
            local_addr,
            rng: StdRng::seed_from_u64(seed),
            order: HashMap::new(),
            secrets: HashMap::new(),
            shares: HashMap::new(),
            decline_proposals: false,
            tamper_partials: false,
        }
    }

    /// The key share this operator derived for a round, if the DKG finished.
    pub fn key_share(&self, round_id: &DkgRoundId) -> Option<&KeyShare> {
        self.shares.get(round_id)
    }

    fn my_index(&self, round_id: &DkgRoundId) -> Option<u32> {
        self.order
            .get(round_id)?
            .iter()
            .position(|addr| addr == &self.local_addr)
            .map(|i| i as u32)
    }

    /// Answer one pending operation.
    ///
    /// Panics on malformed operation payloads: the node built them, so a
    /// failure here is a harness bug worth failing the test for.
    pub fn answer(&mut self, op: &Operation) -> OperatorAnswer {
        match op.kind {
            OperationKind::SignatureProposal => {
                let payload: ProposalInitPayload =
                    serde_json::from_slice(&op.payload).expect("proposal op payload parses");
                let order = payload
                    .participants
                    .iter()
                    .map(|p| ParticipantAddr::from_verify_key(&p.verify_key))
                    .collect();
                self.order.insert(op.round_id.clone(), order);
                if self.decline_proposals {
                    OperatorAnswer::Result(
                        serde_json::to_vec(&ProposalResultPayload { confirm: false })
                            .expect("result serializes"),
                    )
                } else {
                    OperatorAnswer::Approve
                }
            }

            OperationKind::DkgCommits => {
                let request: DkgCommitsRequest =
                    serde_json::from_slice(&op.payload).expect("commits op payload parses");
                let secret = DkgSecret::generate(request.threshold, &mut self.rng)
                    .expect("threshold is positive");
                let commitments = secret.commitments().to_bytes();
                self.secrets.insert(op.round_id.clone(), secret);
                OperatorAnswer::Result(commitments)
            }

            OperationKind::DkgDeals => {
                let request: DkgDealsRequest =
                    serde_json::from_slice(&op.payload).expect("deals op payload parses");
                let n = request.commitments.len() as u16;
                let secret = self
                    .secrets
                    .get(&op.round_id)
                    .expect("commits answered before deals");
                OperatorAnswer::Result(secret.deal_bundle(n).to_bytes())
            }

            OperationKind::DkgResponses => {
                let request: DkgResponsesRequest =
                    serde_json::from_slice(&op.payload).expect("responses op payload parses");
                let order = self.order[&op.round_id].clone();
                let my_index = self.my_index(&op.round_id).expect("operator is a participant");

                let mut verdicts = std::collections::BTreeMap::new();
                let mut my_deals = Vec::new();
                for (dealer_index, dealer) in order.iter().enumerate() {
                    let commits = Commitments::from_bytes(&request.commitments[dealer])
                        .expect("collected commitments decode");
                    let bundle = DealBundle::from_bytes(&request.deals[dealer])
                        .expect("collected deal bundles decode");
                    let share = bundle.deal_for(my_index).expect("bundle covers everyone");
                    let ok = DealBundle::verify_deal(&commits, my_index, &share).is_ok();
                    verdicts.insert(dealer_index as u32, ok);
                    if ok {
                        my_deals.push(share);
                    }
                }
                // All deals verified: the share is final.
                if verdicts.values().all(|ok| *ok) {
                    let share = KeyShare::assemble(my_index, my_deals.iter())
                        .expect("at least one deal");
                    self.shares.insert(op.round_id.clone(), share);
                }
                OperatorAnswer::Result(ResponseBundle::new(verdicts).to_bytes())
            }

            OperationKind::DkgMasterKey => {
                let request: DkgMasterKeyRequest =
                    serde_json::from_slice(&op.payload).expect("master key op payload parses");
                let all: Vec<Commitments> = request
                    .commitments
                    .values()
                    .map(|bytes| Commitments::from_bytes(bytes).expect("commitments decode"))
                    .collect();
                let master =
                    MasterPublicKey::from_commitments(all.iter()).expect("commitments present");
                OperatorAnswer::Result(master.to_bytes())
            }

            OperationKind::SigningProposal => OperatorAnswer::Result(
                serde_json::to_vec(&SigningResultPayload { approve: true })
                    .expect("result serializes"),
            ),

            OperationKind::SigningPartial => {
                let request: SigningPartialRequest =
                    serde_json::from_slice(&op.payload).expect("partial op payload parses");
                let share = self
                    .shares
                    .get(&op.round_id)
                    .expect("DKG finished before signing");
                let message: &[u8] = if self.tamper_partials {
                    b"tampered payload"
                } else {
                    &request.payload
                };
                OperatorAnswer::Result(partial_sign(share, message).to_bytes())
            }

            // Acknowledge and investigate out-of-band.
            OperationKind::ReinitDkg => OperatorAnswer::Result(Vec::new()),
        }
    }
}
