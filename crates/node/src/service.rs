//! Node service: ingestion loop, operation pipeline, and control calls.
//!
//! Logically single-writer. The ingestion task and every control-surface
//! handler share one async mutex around the store and the FSM cache; only one
//! holder mutates at a time. The loop suspends only at `log.fetch`, at store
//! commits, and at the empty-fetch backoff sleep.

use crate::log::{LogError, MessageLog};
use crate::metrics;
use crate::store::{NodeStore, RoundCommit, StoreError};
use custodia_core::{DispatchError, Effect, RoundEvent};
use custodia_crypto::{
    verify_detached, Commitments, CryptoError, DealBundle, MasterPublicKey, NodeKeyPair,
    PartialSignature, ResponseBundle,
};
use custodia_fsm::{RoundPhase, RoundRegistry};
use custodia_types::{
    DkgRoundId, EventKind, LogMessage, Operation, OperationKind, ParticipantAddr,
    ProposalInitPayload, ProposalParticipant, ProposalResultPayload, SigningEntry, SigningId,
    SigningPartialRequest, SigningProposalPayload, SigningResultPayload,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Sleep between empty fetches.
const POLL_BACKOFF: Duration = Duration::from_millis(500);

/// Consecutive transport failures tolerated before giving up.
const MAX_TRANSPORT_FAILURES: u32 = 10;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("operation {0} not found")]
    OperationNotFound(Uuid),
    #[error("operation result rejected: {0}")]
    InvalidOperationResult(String),
    #[error("unknown round {0}")]
    UnknownRound(DkgRoundId),
}

/// Reset-path parameters (§ reset path of the ingestion design).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    pub new_state_path: String,
    pub use_offset: bool,
    pub messages: Vec<String>,
    /// Consumer-group rebinding is transport-specific; recorded for the
    /// operator's audit trail.
    #[serde(default)]
    pub log_consumer_group: Option<String>,
}

/// Round listing entry for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_id: DkgRoundId,
    pub phase: String,
}

/// Why a message was skipped without a state change.
#[derive(Debug)]
enum SkipReason {
    BadSignature,
    Dispatch(DispatchError),
}

impl SkipReason {
    fn label(&self) -> &'static str {
        match self {
            SkipReason::BadSignature => "bad_signature",
            SkipReason::Dispatch(DispatchError::UnexpectedEvent { .. }) => "unexpected_event",
            SkipReason::Dispatch(DispatchError::UnauthorizedSender { .. }) => {
                "unauthorized_sender"
            }
            SkipReason::Dispatch(DispatchError::BadPayload(_)) => "bad_payload",
            SkipReason::Dispatch(DispatchError::UnknownRound(_)) => "unknown_round",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::BadSignature => f.write_str("message signature verification failed"),
            SkipReason::Dispatch(err) => err.fmt(f),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct NodeInner {
    store: Box<dyn NodeStore>,
    registry: RoundRegistry,
    keypair: NodeKeyPair,
    username: String,
    log: Arc<dyn MessageLog>,
}

/// Handle shared by the ingestion task and the control surface.
#[derive(Clone)]
pub struct NodeService {
    inner: Arc<Mutex<NodeInner>>,
    log: Arc<dyn MessageLog>,
}

impl NodeService {
    pub fn new(
        store: Box<dyn NodeStore>,
        log: Arc<dyn MessageLog>,
        keypair: NodeKeyPair,
        username: impl Into<String>,
    ) -> Self {
        let registry = RoundRegistry::new(keypair.addr());
        Self {
            inner: Arc::new(Mutex::new(NodeInner {
                store,
                registry,
                keypair,
                username: username.into(),
                log: log.clone(),
            })),
            log,
        }
    }

    /// The address this node's operator is known by.
    pub async fn local_addr(&self) -> ParticipantAddr {
        self.inner.lock().await.keypair.addr()
    }

    pub async fn username(&self) -> String {
        self.inner.lock().await.username.clone()
    }

    /// The node's advertised verifying key, for building proposals.
    pub async fn verify_key(&self) -> Vec<u8> {
        self.inner.lock().await.keypair.public_bytes().to_vec()
    }

    /// One ingestion tick: fetch from the cursor and apply in offset order.
    ///
    /// Returns how many messages the fetch delivered. Store errors are fatal
    /// for the tick and leave the cursor where it was.
    pub async fn poll_once(&self) -> Result<usize, ServiceError> {
        let from = {
            let inner = self.inner.lock().await;
            inner.store.get_offset()?
        };
        let messages = self.log.fetch(from)?;
        if messages.is_empty() {
            return Ok(0);
        }

        let timer = metrics::TICK_DURATION.start_timer();
        let mut inner = self.inner.lock().await;
        let delivered = messages.len();
        for message in messages {
            inner.process_message(message)?;
        }
        metrics::OPERATIONS_PENDING.set(inner.store.get_operations()?.len() as i64);
        timer.observe_duration();
        Ok(delivered)
    }

    /// Run the ingestion loop until `shutdown` flips or a fatal error.
    ///
    /// Transport failures are retried with backoff and surfaced only after
    /// persisting; an in-flight tick always completes or rolls back before
    /// the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServiceError> {
        let mut transport_failures = 0u32;
        loop {
            if *shutdown.borrow() {
                tracing::info!("ingestion loop stopping on shutdown signal");
                return Ok(());
            }
            match self.poll_once().await {
                Ok(0) => {
                    transport_failures = 0;
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Ok(_) => transport_failures = 0,
                Err(ServiceError::Log(err)) => {
                    transport_failures += 1;
                    if transport_failures >= MAX_TRANSPORT_FAILURES {
                        tracing::error!(%err, "log transport unrecoverable");
                        return Err(ServiceError::Log(err));
                    }
                    tracing::warn!(%err, attempt = transport_failures, "log fetch failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    tracing::error!(%err, "fatal ingestion error");
                    return Err(err);
                }
            }
        }
    }

    // ─── Operation pipeline ─────────────────────────────────────────────

    /// All pending operations, in insertion order.
    pub async fn list_operations(&self) -> Result<Vec<Operation>, ServiceError> {
        Ok(self.inner.lock().await.store.get_operations()?)
    }

    pub async fn get_operation(&self, id: Uuid) -> Result<Operation, ServiceError> {
        self.inner
            .lock()
            .await
            .store
            .get_operation(&id)?
            .ok_or(ServiceError::OperationNotFound(id))
    }

    /// Validate an operator-supplied result, publish the outgoing message it
    /// produces, and retire the operation.
    ///
    /// A result that fails validation leaves the operation pending, so the
    /// operator can retry.
    pub async fn process_operation(&self, id: Uuid, result: Vec<u8>) -> Result<(), ServiceError> {
        self.inner.lock().await.answer_operation(id, result)
    }

    /// Shortcut for answering a `SignatureProposal` operation positively.
    pub async fn approve_participation(&self, id: Uuid) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock().await;
        let op = inner
            .store
            .get_operation(&id)?
            .ok_or(ServiceError::OperationNotFound(id))?;
        if op.kind != OperationKind::SignatureProposal {
            return Err(ServiceError::InvalidRequest(format!(
                "operation {id} is {}, not a signature proposal",
                op.kind
            )));
        }
        let result = serde_json::to_vec(&ProposalResultPayload { confirm: true })
            .expect("payload serialization is infallible");
        inner.answer_operation(id, result)
    }

    // ─── Control surface ────────────────────────────────────────────────

    /// Open a new round: publish the `InitProposal` carrying the participant
    /// list and threshold. The proposer must be in its own list.
    pub async fn start_round(
        &self,
        participants: Vec<ProposalParticipant>,
        threshold: u16,
    ) -> Result<DkgRoundId, ServiceError> {
        let mut inner = self.inner.lock().await;
        let local = inner.keypair.addr();
        let is_member = participants
            .iter()
            .any(|p| ParticipantAddr::from_verify_key(&p.verify_key) == local);
        if !is_member {
            return Err(ServiceError::InvalidRequest(
                "proposer is not in the participant list".into(),
            ));
        }
        let round_id = DkgRoundId::new(Uuid::new_v4().to_string());
        let payload = ProposalInitPayload {
            participants,
            threshold,
        };
        inner.publish(&round_id, RoundEvent::InitProposal(payload), None)?;
        Ok(round_id)
    }

    /// Queue a `SigningProposal` operation over an externally supplied
    /// payload. The round must already be in its signing phase; the operator
    /// approves the operation to actually open the batch on the log.
    pub async fn propose_signing(
        &self,
        round_id: DkgRoundId,
        payload: Vec<u8>,
    ) -> Result<SigningId, ServiceError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_loaded(&round_id)?;
        let in_signing_phase = inner
            .registry
            .get(&round_id)
            .map(|machine| matches!(machine.phase, RoundPhase::Signing(_)))
            .unwrap_or(false);
        if !in_signing_phase {
            return Err(ServiceError::InvalidRequest(format!(
                "round {round_id} is not in its signing phase"
            )));
        }

        let signing_id = SigningId::new(Uuid::new_v4().to_string());
        let op_payload = serde_json::to_vec(&SigningProposalPayload {
            signing_id: signing_id.clone(),
            payload,
        })
        .expect("payload serialization is infallible");
        let operation = Operation::new(
            round_id,
            OperationKind::SigningProposal,
            op_payload,
            vec![],
            None,
            now_ms(),
        );
        inner.store.commit(RoundCommit {
            put_operations: vec![operation],
            ..Default::default()
        })?;
        Ok(signing_id)
    }

    pub async fn list_rounds(&self) -> Result<Vec<RoundSummary>, ServiceError> {
        let mut inner = self.inner.lock().await;
        let mut out = Vec::new();
        for round_id in inner.store.list_rounds()? {
            inner.ensure_loaded(&round_id)?;
            let phase = inner
                .registry
                .get(&round_id)
                .map(|machine| machine.phase.name().to_owned())
                .unwrap_or_else(|| "unknown".to_owned());
            out.push(RoundSummary { round_id, phase });
        }
        Ok(out)
    }

    /// Raw FSM snapshot of a round, as persisted.
    pub async fn round_snapshot(
        &self,
        round_id: DkgRoundId,
    ) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.inner.lock().await.store.load_fsm(&round_id)?)
    }

    pub async fn signing_archive(
        &self,
        round_id: DkgRoundId,
    ) -> Result<Vec<SigningEntry>, ServiceError> {
        Ok(self.inner.lock().await.store.archive_list(&round_id)?)
    }

    pub async fn signing_archive_entry(
        &self,
        round_id: DkgRoundId,
        signing_id: SigningId,
    ) -> Result<Option<SigningEntry>, ServiceError> {
        Ok(self
            .inner
            .lock()
            .await
            .store
            .archive_get(&round_id, &signing_id)?)
    }

    /// Reset path: record ignore sets on the log transport, fork the store
    /// into a fresh location, and rebind. Atomic at the store boundary - any
    /// failure leaves the old store authoritative.
    pub async fn reset_state(&self, request: ResetRequest) -> Result<String, ServiceError> {
        let mut inner = self.inner.lock().await;
        inner
            .log
            .ignore_messages(&request.messages, request.use_offset)?;
        let fresh = inner
            .store
            .new_state_from_old(Path::new(&request.new_state_path))?;
        inner.store = fresh;
        inner.registry.clear();
        tracing::info!(
            location = %inner.store.location(),
            consumer_group = ?request.log_consumer_group,
            "state reset, rebound to fresh store"
        );
        Ok(inner.store.location())
    }
}

impl NodeInner {
    /// Apply one fetched message: skip, or verify + dispatch + commit.
    fn process_message(&mut self, message: LogMessage) -> Result<(), ServiceError> {
        let cursor = self.store.get_offset()?;
        if message.offset < cursor {
            metrics::record_skip("duplicate_delivery");
            return Ok(());
        }
        if self.log.is_ignored(&message) {
            metrics::record_skip("ignored");
            self.store
                .commit(RoundCommit::offset_only(message.offset + 1))?;
            return Ok(());
        }

        match self.validate_and_dispatch(&message)? {
            Ok((effects, snapshot)) => self.commit_dispatch(&message, effects, snapshot),
            Err(reason) => {
                tracing::warn!(
                    offset = message.offset,
                    round = %message.dkg_round_id,
                    event = %message.event,
                    sender = %message.sender_addr,
                    %reason,
                    "skipping message"
                );
                metrics::record_skip(reason.label());
                self.store
                    .commit(RoundCommit::offset_only(message.offset + 1))?;
                Ok(())
            }
        }
    }

    /// Authenticate and dispatch. The outer `Result` is fatal (store); the
    /// inner one is the non-fatal validation taxonomy.
    #[allow(clippy::type_complexity)]
    fn validate_and_dispatch(
        &mut self,
        message: &LogMessage,
    ) -> Result<Result<(Vec<Effect>, Vec<u8>), SkipReason>, ServiceError> {
        let round_id = &message.dkg_round_id;
        self.ensure_loaded(round_id)?;

        // Resolve the sender's verifying key. For the first message of a
        // round the key comes from the structurally validated payload itself.
        let verify_key = if self.registry.contains(round_id) {
            match self.registry.verify_key(round_id, &message.sender_addr) {
                Some(key) => key,
                None => {
                    return Ok(Err(SkipReason::Dispatch(
                        DispatchError::UnauthorizedSender {
                            sender: message.sender_addr.clone(),
                        },
                    )));
                }
            }
        } else if message.event == EventKind::ProposalInit {
            let payload: ProposalInitPayload = match serde_json::from_slice(&message.data) {
                Ok(payload) => payload,
                Err(e) => {
                    return Ok(Err(SkipReason::Dispatch(DispatchError::BadPayload(
                        e.to_string(),
                    ))));
                }
            };
            let entry = payload.participants.iter().find(|p| {
                ParticipantAddr::from_verify_key(&p.verify_key) == message.sender_addr
            });
            match entry {
                Some(entry) => entry.verify_key.clone(),
                None => {
                    return Ok(Err(SkipReason::Dispatch(
                        DispatchError::UnauthorizedSender {
                            sender: message.sender_addr.clone(),
                        },
                    )));
                }
            }
        } else {
            return Ok(Err(SkipReason::Dispatch(DispatchError::UnknownRound(
                round_id.clone(),
            ))));
        };

        if verify_detached(&verify_key, &message.signing_bytes(), &message.signature).is_err() {
            return Ok(Err(SkipReason::BadSignature));
        }

        let event = match RoundEvent::decode(message.event, &message.data) {
            Ok(event) => event,
            Err(err) => return Ok(Err(SkipReason::Dispatch(err))),
        };
        match self
            .registry
            .dispatch(round_id, event, &message.sender_addr)
        {
            Ok(result) => Ok(Ok(result)),
            Err(err) => Ok(Err(SkipReason::Dispatch(err))),
        }
    }

    /// Execute the effects of a successful dispatch and commit everything.
    ///
    /// Outgoing messages are appended before the store commit: if the commit
    /// fails, the reprocessed message republished on retry is deduplicated by
    /// every peer's state machine, whereas a swallowed message would stall
    /// the ceremony.
    fn commit_dispatch(
        &mut self,
        message: &LogMessage,
        effects: Vec<Effect>,
        snapshot: Vec<u8>,
    ) -> Result<(), ServiceError> {
        let round_id = message.dkg_round_id.clone();
        let result = self.apply_effects(message, effects, snapshot);
        if result.is_err() {
            // The store still holds the pre-dispatch snapshot; drop the
            // mutated cache entry so the retry re-reads the committed state.
            self.registry.remove(&round_id);
        }
        result
    }

    fn apply_effects(
        &mut self,
        message: &LogMessage,
        effects: Vec<Effect>,
        snapshot: Vec<u8>,
    ) -> Result<(), ServiceError> {
        let round_id = message.dkg_round_id.clone();
        let mut commit = RoundCommit {
            fsm: Some((round_id.clone(), snapshot)),
            set_offset: Some(message.offset + 1),
            ..Default::default()
        };
        for effect in effects {
            match effect {
                Effect::QueueOperation {
                    kind,
                    payload,
                    to,
                    extra,
                } => {
                    commit.put_operations.push(Operation::new(
                        round_id.clone(),
                        kind,
                        payload,
                        to,
                        extra,
                        now_ms(),
                    ));
                }
                Effect::Publish { event, recipient } => {
                    self.publish(&round_id, event, recipient)?;
                }
                Effect::Archive { entry } => commit.archive.push(entry),
                Effect::CancelRoundOperations => {
                    commit.cancel_round_operations = Some(round_id.clone());
                }
            }
        }
        self.store.commit(commit)?;
        metrics::COMMITS.inc();
        metrics::MESSAGES_PROCESSED.inc();
        Ok(())
    }

    /// Load a round's snapshot from the store into the registry cache.
    fn ensure_loaded(&mut self, round_id: &DkgRoundId) -> Result<(), ServiceError> {
        if self.registry.contains(round_id) {
            return Ok(());
        }
        if let Some(snapshot) = self.store.load_fsm(round_id)? {
            self.registry
                .load_snapshot(round_id, &snapshot)
                .map_err(|e| StoreError::Corrupt {
                    namespace: "fsm",
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Sign and append one outgoing message.
    ///
    /// The offset is reserved immediately before the append; both happen
    /// under the node mutex, so the pair is race-free.
    fn publish(
        &mut self,
        round_id: &DkgRoundId,
        event: RoundEvent,
        recipient: Option<ParticipantAddr>,
    ) -> Result<u64, ServiceError> {
        let (kind, data) = event.encode();
        let offset = self.log.next_offset()?;
        let mut message = LogMessage {
            id: Uuid::new_v4(),
            dkg_round_id: round_id.clone(),
            offset,
            event: kind,
            data,
            sender_addr: self.keypair.addr(),
            recipient_addr: recipient,
            signature: Vec::new(),
        };
        message.signature = self.keypair.sign(&message.signing_bytes());
        Ok(self.log.append(message)?)
    }

    /// Validate an operation result and convert it into its outgoing message.
    fn answer_operation(&mut self, id: Uuid, result: Vec<u8>) -> Result<(), ServiceError> {
        let op = self
            .store
            .get_operation(&id)?
            .ok_or(ServiceError::OperationNotFound(id))?;

        let invalid =
            |what: &str| ServiceError::InvalidOperationResult(format!("{}: {what}", op.kind));

        let outgoing: Option<RoundEvent> = match op.kind {
            OperationKind::SignatureProposal => {
                let answer: ProposalResultPayload = serde_json::from_slice(&result)
                    .map_err(|e| invalid(&e.to_string()))?;
                Some(if answer.confirm {
                    RoundEvent::ConfirmProposal
                } else {
                    RoundEvent::DeclineProposal
                })
            }
            OperationKind::DkgCommits => {
                Commitments::from_bytes(&result).map_err(|e| invalid(&e.to_string()))?;
                Some(RoundEvent::DkgCommits {
                    commitments: result,
                })
            }
            OperationKind::DkgDeals => {
                DealBundle::from_bytes(&result).map_err(|e| invalid(&e.to_string()))?;
                Some(RoundEvent::DkgDeals { deals: result })
            }
            OperationKind::DkgResponses => {
                ResponseBundle::from_bytes(&result).map_err(|e| invalid(&e.to_string()))?;
                Some(RoundEvent::DkgResponses { responses: result })
            }
            OperationKind::DkgMasterKey => {
                MasterPublicKey::from_bytes(&result).map_err(|e| invalid(&e.to_string()))?;
                Some(RoundEvent::DkgMasterKey { master_key: result })
            }
            OperationKind::SigningProposal => {
                let answer: SigningResultPayload = serde_json::from_slice(&result)
                    .map_err(|e| invalid(&e.to_string()))?;
                if answer.approve {
                    let proposal: SigningProposalPayload = serde_json::from_slice(&op.payload)
                        .map_err(|e| {
                            ServiceError::InvalidOperationResult(format!(
                                "corrupt operation payload: {e}"
                            ))
                        })?;
                    Some(RoundEvent::SigningProposal {
                        signing_id: proposal.signing_id,
                        payload: proposal.payload,
                    })
                } else {
                    None
                }
            }
            OperationKind::SigningPartial => {
                PartialSignature::from_bytes(&result).map_err(|e| invalid(&e.to_string()))?;
                let request: SigningPartialRequest = serde_json::from_slice(&op.payload)
                    .map_err(|e| {
                        ServiceError::InvalidOperationResult(format!(
                            "corrupt operation payload: {e}"
                        ))
                    })?;
                Some(RoundEvent::SigningPartial {
                    signing_id: request.signing_id,
                    partial: result,
                })
            }
            // Reinit is an attention flag; answering it acknowledges.
            OperationKind::ReinitDkg => None,
        };

        if let Some(event) = outgoing {
            self.publish(&op.round_id, event, None)?;
        }
        self.store.commit(RoundCommit {
            delete_operations: vec![id],
            ..Default::default()
        })?;
        tracing::info!(operation = %id, kind = %op.kind, "operation answered");
        Ok(())
    }
}
