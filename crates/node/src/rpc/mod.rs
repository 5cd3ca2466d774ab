//! HTTP control surface.
//!
//! Consumed by the operator's front-end. Endpoint groups:
//!
//! # Operations
//!
//! - `GET  /api/v1/operations` - pending operator work items
//! - `GET  /api/v1/operations/:id` - one work item
//! - `POST /api/v1/operations` - submit an operation result
//! - `POST /api/v1/approve_participation` - confirm joining a round
//!
//! # Rounds & signing
//!
//! - `GET  /api/v1/rounds` - round listing with phase
//! - `POST /api/v1/rounds` - propose a new round
//! - `POST /api/v1/signing_proposals` - queue a signing batch proposal
//! - `GET  /api/v1/signatures/:round_id` - signing archive of a round
//! - `GET  /api/v1/signatures/:round_id/:signing_id` - one archive entry
//!
//! # Recovery & observability
//!
//! - `POST /api/v1/reset_state` - fork the store and skip poisoned messages
//! - `GET  /health` - liveness probe
//! - `GET  /metrics` - Prometheus metrics in text format
//!
//! The HTTP layer binds requests into strongly-typed DTOs at the boundary;
//! the service contract underneath is independent of any wire binding.
//! Mutating handlers serialize through the same single-writer mutex as the
//! ingestion loop.

mod handlers;
mod routes;
mod server;
mod types;

pub use routes::router;
pub use server::{serve, RpcServerConfig};
pub use types::*;
