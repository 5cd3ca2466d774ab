//! The custodia node.
//!
//! Wraps the deterministic ceremony state machine with real I/O:
//!
//! - [`store`]: durable state (FSM snapshots, operation queue, offset cursor,
//!   signature archive) with transactional multi-key commits
//! - [`log`]: the pull interface onto the shared append-only message log
//! - [`service`]: the single-writer ingestion loop and operation pipeline
//! - [`rpc`]: the HTTP control surface consumed by the front-end
//! - [`keystore`]: loading the node's ed25519 identity
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Custodia Node                         │
//! │                                                              │
//! │  Ingestion task:                                             │
//! │    loop { msgs = log.fetch(cursor);                          │
//! │           effects = fsm.dispatch(msg);                       │
//! │           store.commit(snapshot + ops + cursor); }           │
//! │                                                              │
//! │  Control surface (axum):                                     │
//! │    operations / approve / reset / rounds / signatures        │
//! │                                                              │
//! │  Both share one async mutex: a single writer mutates the     │
//! │  store and the FSM cache at a time.                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod keystore;
pub mod log;
pub mod metrics;
pub mod rpc;
pub mod service;
pub mod store;
pub mod telemetry;

pub use config::NodeConfig;
pub use keystore::{FileKeyStore, KeyStore, KeyStoreError};
pub use log::{FileLog, LogError, MemoryLog, MessageLog, SharedMemoryLog};
pub use service::{NodeService, ResetRequest, RoundSummary, ServiceError};
pub use store::{MemoryStore, NodeStore, RocksStore, RoundCommit, StoreError};
pub use telemetry::init_telemetry;
