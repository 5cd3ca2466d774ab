//! Crypto primitives façade.
//!
//! Two independent halves, both pure (no I/O, no globals):
//!
//! - [`keys`]: ed25519 signing and verification of log messages, plus the
//!   address fingerprint derivation.
//! - [`threshold`]: the threshold-BLS cryptosystem over BLS12-381 -
//!   Joint-Feldman DKG artifacts (commitments, deals, responses, master key)
//!   and partial signing / aggregation.
//!
//! Everything above this crate treats the threshold artifacts as opaque byte
//! strings; only the façade (and the operator's signer) interprets them.

mod keys;
mod threshold;

pub use keys::{verify_detached, NodeKeyPair, VerifyingKeyBytes};
pub use threshold::{
    aggregate, partial_sign, verify_master_signature, verify_partial, Commitments, DealBundle,
    DkgSecret, KeyShare, MasterPublicKey, PartialSignature, ResponseBundle,
    COMMITMENT_POINT_LEN, PARTIAL_SIGNATURE_LEN, SCALAR_LEN,
};

use thiserror::Error;

/// Failure classes of the façade.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A signature did not verify against the claimed key.
    #[error("invalid signature")]
    InvalidSignature,
    /// A threshold artifact (deal, share, commitment, partial) failed
    /// structural or cryptographic validation.
    #[error("invalid share: {0}")]
    InvalidShare(String),
    /// Internal malfunction: malformed key material, impossible encodings.
    #[error("crypto internal error: {0}")]
    Internal(String),
}
