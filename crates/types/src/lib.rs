//! Core types for the custodia distributed-custody signing client.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **Identifiers**: [`DkgRoundId`], [`SigningId`], [`ParticipantAddr`]
//! - **Round membership**: [`Participant`]
//! - **Log records**: [`LogMessage`] and its [`EventKind`] discriminant
//! - **Operator work items**: [`Operation`] and [`OperationKind`]
//! - **Signature archive**: [`SigningEntry`]
//! - **Wire payloads**: the serde DTOs carried in `LogMessage::data`
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod archive;
mod identifiers;
mod message;
mod operation;
mod participant;
mod payloads;

pub use archive::SigningEntry;
pub use identifiers::{DkgRoundId, ParticipantAddr, SigningId, ADDR_FINGERPRINT_LEN};
pub use message::{EventKind, EventKindParseError, LogMessage};
pub use operation::{Operation, OperationKind};
pub use participant::Participant;
pub use payloads::{
    DkgCommitsRequest, DkgDealsRequest, DkgMasterKeyRequest, DkgResponsesRequest,
    ProposalInitPayload, ProposalParticipant, ProposalResultPayload, ReinitDkgNotice,
    SigningPartialPayload, SigningPartialRequest, SigningProposalPayload, SigningResultPayload,
};
