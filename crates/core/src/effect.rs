//! Effect types for the deterministic ceremony state machine.

use crate::RoundEvent;
use custodia_types::{OperationKind, ParticipantAddr, SigningEntry};

/// What a dispatch wants the node to do.
///
/// Effects are **commands**: the node service executes them and commits the
/// results together with the mutated snapshot in one transaction, so an
/// observer replaying the log always sees cause before effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Enqueue a work item for the local operator.
    ///
    /// The service assigns the replay-stable id and the creation timestamp.
    QueueOperation {
        kind: OperationKind,
        payload: Vec<u8>,
        /// Addresses the eventual result message is directed at; empty means
        /// broadcast.
        to: Vec<ParticipantAddr>,
        extra: Option<String>,
    },

    /// Sign and append a new message to the shared log.
    Publish {
        event: RoundEvent,
        recipient: Option<ParticipantAddr>,
    },

    /// Write a completed (or newly opened) signing batch to the archive.
    Archive { entry: SigningEntry },

    /// Cancel every pending operation of this round (the round aborted).
    CancelRoundOperations,
}
