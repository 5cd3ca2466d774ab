//! Multi-node cluster on one shared in-memory log.

use crate::operator::{OperatorAnswer, ScriptedOperator};
use custodia_crypto::NodeKeyPair;
use custodia_node::{MemoryLog, MemoryStore, NodeService, SharedMemoryLog};
use custodia_types::{DkgRoundId, ProposalParticipant};
use std::sync::Arc;

/// One simulated participant: a node service plus its scripted operator.
pub struct SimNode {
    pub username: String,
    pub keypair: NodeKeyPair,
    pub service: NodeService,
    pub operator: ScriptedOperator,
}

/// A cluster of nodes sharing one log.
///
/// Nodes are ticked sequentially, so every run with the same seeds is
/// deterministic end to end.
pub struct Cluster {
    pub shared_log: Arc<SharedMemoryLog>,
    pub nodes: Vec<SimNode>,
}

impl Cluster {
    /// Build `n` nodes with deterministic identities.
    pub fn new(n: usize) -> Self {
        let shared_log = SharedMemoryLog::new();
        let nodes = (0..n)
            .map(|i| Self::make_node(&shared_log, i))
            .collect();
        Self { shared_log, nodes }
    }

    fn make_node(shared_log: &Arc<SharedMemoryLog>, index: usize) -> SimNode {
        let keypair = NodeKeyPair::from_secret_bytes(&[index as u8 + 1; 32])
            .expect("static seed is 32 bytes");
        let username = format!("operator-{index}");
        let log = Arc::new(MemoryLog::attach(shared_log.clone()));
        let service = NodeService::new(
            Box::new(MemoryStore::new()),
            log,
            keypair.clone(),
            username.clone(),
        );
        let operator = ScriptedOperator::new(keypair.addr(), 1000 + index as u64);
        SimNode {
            username,
            keypair,
            service,
            operator,
        }
    }

    /// The proposal participant list covering every node.
    pub fn participants(&self) -> Vec<ProposalParticipant> {
        self.nodes
            .iter()
            .map(|node| ProposalParticipant {
                username: node.username.clone(),
                verify_key: node.keypair.public_bytes().to_vec(),
                // Opaque threshold-key material; the ceremony derives the
                // real keys itself.
                dkg_pub: blake3::hash(&node.keypair.public_bytes()).as_bytes().to_vec(),
            })
            .collect()
    }

    /// One pass over every node: ingest, then answer pending operations.
    /// Returns whether anything happened.
    pub async fn step(&mut self) -> bool {
        let mut progress = false;
        for node in &mut self.nodes {
            let processed = node
                .service
                .poll_once()
                .await
                .expect("simulated ingestion never fails");
            if processed > 0 {
                progress = true;
            }

            let operations = node
                .service
                .list_operations()
                .await
                .expect("memory store never fails");
            for op in operations {
                match node.operator.answer(&op) {
                    OperatorAnswer::Approve => {
                        node.service
                            .approve_participation(op.id)
                            .await
                            .expect("approval is valid");
                        progress = true;
                    }
                    OperatorAnswer::Result(result) => {
                        node.service
                            .process_operation(op.id, result)
                            .await
                            .expect("scripted result is valid");
                        progress = true;
                    }
                    OperatorAnswer::Skip => {}
                }
            }
        }
        progress
    }

    /// Step until nothing moves anymore (bounded, to catch livelocks).
    pub async fn run_until_quiescent(&mut self) {
        for _ in 0..256 {
            if !self.step().await {
                return;
            }
        }
        panic!("cluster failed to quiesce within the step budget");
    }

    /// Every node's persisted FSM snapshot for a round.
    pub async fn snapshots(&self, round_id: &DkgRoundId) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::new();
        for node in &self.nodes {
            out.push(
                node.service
                    .round_snapshot(round_id.clone())
                    .await
                    .expect("memory store never fails"),
            );
        }
        out
    }

    /// Every node's phase name for a round.
    pub async fn phases(&self, round_id: &DkgRoundId) -> Vec<Option<String>> {
        let mut out = Vec::new();
        for node in &self.nodes {
            let rounds = node
                .service
                .list_rounds()
                .await
                .expect("memory store never fails");
            out.push(
                rounds
                    .into_iter()
                    .find(|summary| &summary.round_id == round_id)
                    .map(|summary| summary.phase),
            );
        }
        out
    }
}
