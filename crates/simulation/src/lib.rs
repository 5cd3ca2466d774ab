//! Cluster simulation for integration testing.
//!
//! Wires several [`custodia_node::NodeService`] instances onto one shared
//! in-memory log, with a [`ScriptedOperator`] per node standing in for the
//! human (and their air-gapped signer). Tests drive the cluster to
//! quiescence and assert on the resulting stores and archives.

mod cluster;
mod operator;

pub use cluster::{Cluster, SimNode};
pub use operator::{OperatorAnswer, ScriptedOperator};
