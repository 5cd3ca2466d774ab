//! Core contract of the ceremony state machine.
//!
//! This crate provides the three vocabularies shared by the FSM and the node:
//!
//! - [`RoundEvent`]: all possible inputs to a round's state machine, decoded
//!   from `(EventKind, data)` pairs pulled off the log
//! - [`Effect`]: all possible outputs of a dispatch - operator work items to
//!   enqueue, messages to publish, archive entries to write
//! - [`DispatchError`]: the non-fatal validation taxonomy
//!
//! # Architecture
//!
//! ```text
//! RoundEvent → RoundStateMachine::dispatch() → Vec<Effect>
//! ```
//!
//! The state machine is:
//! - **Synchronous**: no async, no .await
//! - **Deterministic**: same snapshot + event = same effects
//! - **Pure-ish**: mutates itself, performs no I/O
//!
//! All I/O is handled by the node service, which persists the mutated
//! snapshot, executes the effects, and commits everything in one transaction.

mod effect;
mod event;

pub use effect::Effect;
pub use event::RoundEvent;

use custodia_types::{DkgRoundId, EventKind, ParticipantAddr};
use thiserror::Error;

/// Non-fatal rejection of one log message.
///
/// The ingestion loop records these to the diagnostic stream and advances the
/// cursor; they never abort a tick.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event does not match the machine's current state.
    #[error("unexpected event {kind} in state {state}")]
    UnexpectedEvent {
        state: &'static str,
        kind: EventKind,
    },

    /// The sender is not in the round's participant list.
    #[error("unauthorized sender {sender}")]
    UnauthorizedSender { sender: ParticipantAddr },

    /// The payload failed structural validation.
    #[error("bad payload: {0}")]
    BadPayload(String),

    /// A non-init event arrived for a round with no state machine.
    #[error("unknown round {0}")]
    UnknownRound(DkgRoundId),
}
