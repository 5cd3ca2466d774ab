//! End-to-end ceremony scenarios.

use custodia_crypto::{verify_master_signature, MasterPublicKey};
use custodia_fsm::{RoundPhase, RoundStateMachine};
use custodia_simulation::Cluster;
use custodia_types::DkgRoundId;

/// Parse a node's snapshot and return its signing-phase master key.
fn master_key_of(snapshot: &[u8]) -> Vec<u8> {
    let machine = RoundStateMachine::from_snapshot(snapshot).unwrap();
    match machine.phase {
        RoundPhase::Signing(state) => state.master_public_key,
        other => panic!("round not in signing phase: {}", other.name()),
    }
}

async fn run_dkg(cluster: &mut Cluster, threshold: u16) -> DkgRoundId {
    let participants = cluster.participants();
    let round_id = cluster.nodes[0]
        .service
        .start_round(participants, threshold)
        .await
        .unwrap();
    cluster.run_until_quiescent().await;
    round_id
}

#[tokio::test]
async fn happy_path_dkg_four_nodes() {
    let mut cluster = Cluster::new(4);
    let round_id = run_dkg(&mut cluster, 2).await;

    // Every node finished DKG and derived the same joint public key.
    let snapshots = cluster.snapshots(&round_id).await;
    let keys: Vec<Vec<u8>> = snapshots
        .iter()
        .map(|s| master_key_of(s.as_ref().unwrap()))
        .collect();
    assert!(keys.windows(2).all(|w| w[0] == w[1]), "identical master keys");
    MasterPublicKey::from_bytes(&keys[0]).unwrap();

    // Nothing left for any operator to do.
    for node in &cluster.nodes {
        assert!(node.service.list_operations().await.unwrap().is_empty());
    }

    // Every node holds a persisted snapshot for the round.
    for node in &cluster.nodes {
        assert!(node
            .service
            .round_snapshot(round_id.clone())
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn signing_batch_aggregates_and_archives() {
    let mut cluster = Cluster::new(4);
    let round_id = run_dkg(&mut cluster, 2).await;
    let payload = b"rotate withdrawal credentials to 0x01".to_vec();

    let signing_id = cluster.nodes[0]
        .service
        .propose_signing(round_id.clone(), payload.clone())
        .await
        .unwrap();
    cluster.run_until_quiescent().await;

    let master = {
        let snapshot = cluster.snapshots(&round_id).await[0].clone().unwrap();
        MasterPublicKey::from_bytes(&master_key_of(&snapshot)).unwrap()
    };

    for node in &cluster.nodes {
        let entry = node
            .service
            .signing_archive_entry(round_id.clone(), signing_id.clone())
            .await
            .unwrap()
            .expect("every node archived the batch");
        assert_eq!(entry.payload, payload);
        assert_eq!(entry.participants.len(), 2, "first t partials in address order");
        let final_signature = entry.final_signature.expect("batch completed");
        verify_master_signature(&master, &payload, &final_signature).unwrap();
    }
}

#[tokio::test]
async fn tampered_partial_is_excluded_from_aggregation() {
    // 3-of-5 batch with one operator producing garbage partials.
    let mut cluster = Cluster::new(5);
    let round_id = run_dkg(&mut cluster, 3).await;
    let tampered_addr = cluster.nodes[1].keypair.addr();
    cluster.nodes[1].operator.tamper_partials = true;

    let payload = b"slashing protection export".to_vec();
    let signing_id = cluster.nodes[0]
        .service
        .propose_signing(round_id.clone(), payload.clone())
        .await
        .unwrap();
    cluster.run_until_quiescent().await;

    let master = {
        let snapshot = cluster.snapshots(&round_id).await[0].clone().unwrap();
        MasterPublicKey::from_bytes(&master_key_of(&snapshot)).unwrap()
    };
    for node in &cluster.nodes {
        let entry = node
            .service
            .signing_archive_entry(round_id.clone(), signing_id.clone())
            .await
            .unwrap()
            .expect("batch completed despite the tampered partial");
        let final_signature = entry.final_signature.expect("batch completed");
        verify_master_signature(&master, &payload, &final_signature).unwrap();
        assert!(
            !entry.participants.contains(&tampered_addr),
            "the tampered partial never entered the aggregation set"
        );
    }
}

#[tokio::test]
async fn declined_proposal_aborts_the_round() {
    let mut cluster = Cluster::new(3);
    cluster.nodes[2].operator.decline_proposals = true;

    let participants = cluster.participants();
    let round_id = cluster.nodes[0]
        .service
        .start_round(participants, 2)
        .await
        .unwrap();
    cluster.run_until_quiescent().await;

    for phase in cluster.phases(&round_id).await {
        assert_eq!(phase.as_deref(), Some("aborted"));
    }
    for node in &cluster.nodes {
        assert!(
            node.service.list_operations().await.unwrap().is_empty(),
            "pending operations were cancelled on abort"
        );
    }
}

#[tokio::test]
async fn second_batch_reuses_the_same_key() {
    let mut cluster = Cluster::new(4);
    let round_id = run_dkg(&mut cluster, 2).await;

    for (i, payload) in [b"batch one".to_vec(), b"batch two".to_vec()].iter().enumerate() {
        let signing_id = cluster.nodes[i]
            .service
            .propose_signing(round_id.clone(), payload.clone())
            .await
            .unwrap();
        cluster.run_until_quiescent().await;

        let snapshot = cluster.snapshots(&round_id).await[0].clone().unwrap();
        let master = MasterPublicKey::from_bytes(&master_key_of(&snapshot)).unwrap();
        let entry = cluster.nodes[3]
            .service
            .signing_archive_entry(round_id.clone(), signing_id)
            .await
            .unwrap()
            .unwrap();
        verify_master_signature(&master, payload, &entry.final_signature.unwrap()).unwrap();
    }

    // Both batches are in every archive.
    for node in &cluster.nodes {
        assert_eq!(
            node.service.signing_archive(round_id.clone()).await.unwrap().len(),
            2
        );
    }
}
