//! Replay determinism.
//!
//! The store state must be a pure function of the message sequence: a fresh
//! node replaying the log a finished cluster produced ends up with exactly
//! the snapshot the live node committed, and replaying again changes nothing.

mod common;

use common::SharedStore;
use custodia_crypto::NodeKeyPair;
use custodia_node::{MemoryLog, MessageLog, NodeService, SharedMemoryLog};
use custodia_simulation::Cluster;
use custodia_types::LogMessage;
use std::sync::Arc;

/// Build a replica of node 0 over a copy of the given messages.
fn replica_of_node0(messages: &[LogMessage], store: SharedStore) -> NodeService {
    let shared = SharedMemoryLog::new();
    let seed_handle = MemoryLog::attach(shared.clone());
    for message in messages {
        seed_handle.append(message.clone()).unwrap();
    }
    // Node 0's identity, as seeded by the cluster.
    let keypair = NodeKeyPair::from_secret_bytes(&[1u8; 32]).unwrap();
    NodeService::new(
        Box::new(store),
        Arc::new(MemoryLog::attach(shared)),
        keypair,
        "operator-0",
    )
}

async fn drain(service: &NodeService) {
    loop {
        if service.poll_once().await.unwrap() == 0 {
            return;
        }
    }
}

#[tokio::test]
async fn replay_reproduces_the_live_state() {
    let mut cluster = Cluster::new(4);
    let participants = cluster.participants();
    let round_id = cluster.nodes[0]
        .service
        .start_round(participants, 2)
        .await
        .unwrap();
    cluster.run_until_quiescent().await;

    let payload = b"deterministic payload".to_vec();
    let signing_id = cluster.nodes[0]
        .service
        .propose_signing(round_id.clone(), payload)
        .await
        .unwrap();
    cluster.run_until_quiescent().await;

    let live_snapshot = cluster.snapshots(&round_id).await[0].clone().unwrap();
    let live_entry = cluster.nodes[0]
        .service
        .signing_archive_entry(round_id.clone(), signing_id.clone())
        .await
        .unwrap()
        .unwrap();

    // Replay the full log into a fresh store.
    let messages = cluster.shared_log.all_messages();
    let replica = replica_of_node0(&messages, SharedStore::new());
    drain(&replica).await;

    let replayed_snapshot = replica
        .round_snapshot(round_id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        replayed_snapshot, live_snapshot,
        "replayed snapshot is byte-identical to the live one"
    );
    let replayed_entry = replica
        .signing_archive_entry(round_id.clone(), signing_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed_entry, live_entry);
}

#[tokio::test]
async fn restart_after_replay_changes_nothing() {
    let mut cluster = Cluster::new(3);
    let participants = cluster.participants();
    let round_id = cluster.nodes[0]
        .service
        .start_round(participants, 2)
        .await
        .unwrap();
    cluster.run_until_quiescent().await;

    let messages = cluster.shared_log.all_messages();
    let store = SharedStore::new();
    let replica = replica_of_node0(&messages, store.clone());
    drain(&replica).await;
    let snapshot_before = replica
        .round_snapshot(round_id.clone())
        .await
        .unwrap()
        .unwrap();

    // Restart: a new service over the same store and log re-fetches from the
    // committed cursor. Nothing is reprocessed, nothing changes.
    drop(replica);
    let restarted = replica_of_node0(&messages, store);
    drain(&restarted).await;
    let snapshot_after = restarted
        .round_snapshot(round_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot_before, snapshot_after);
}
