//! Ed25519 keys for log message authentication.

use crate::CryptoError;
use custodia_types::ParticipantAddr;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Raw verifying key bytes as they travel on the wire.
pub type VerifyingKeyBytes = [u8; 32];

/// The node's long-lived ed25519 keypair.
///
/// Loaded once at startup from the keystore and held in memory; never written
/// to the state store.
#[derive(Clone)]
pub struct NodeKeyPair {
    signing: SigningKey,
}

impl std::fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeyPair")
            .field("addr", &self.addr())
            .finish_non_exhaustive()
    }
}

impl NodeKeyPair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct from the 32-byte secret seed.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Internal("ed25519 secret must be 32 bytes".into()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// The 32-byte secret seed (for the keystore only).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// The verifying key bytes advertised during signature-proposal.
    pub fn public_bytes(&self) -> VerifyingKeyBytes {
        self.signing.verifying_key().to_bytes()
    }

    /// The address fingerprint other participants know this node by.
    pub fn addr(&self) -> ParticipantAddr {
        ParticipantAddr::from_verify_key(&self.public_bytes())
    }

    /// Sign an arbitrary byte string.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing.sign(msg).to_vec()
    }
}

/// Verify a detached ed25519 signature against raw verifying key bytes.
pub fn verify_detached(
    verify_key: &[u8],
    msg: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key_bytes: [u8; 32] = verify_key
        .try_into()
        .map_err(|_| CryptoError::Internal("ed25519 public key must be 32 bytes".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| CryptoError::Internal("malformed ed25519 public key".into()))?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(msg, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = NodeKeyPair::generate();
        let msg = b"offset ordering is the canonical ordering";
        let sig = kp.sign(msg);
        verify_detached(&kp.public_bytes(), msg, &sig).unwrap();
    }

    #[test]
    fn mutated_byte_fails_verification() {
        let kp = NodeKeyPair::generate();
        let msg = b"payload".to_vec();
        let sig = kp.sign(&msg);

        let mut tampered = msg.clone();
        tampered[0] ^= 1;
        assert!(verify_detached(&kp.public_bytes(), &tampered, &sig).is_err());

        let mut bad_sig = sig.clone();
        bad_sig[10] ^= 1;
        assert!(verify_detached(&kp.public_bytes(), &msg, &bad_sig).is_err());
    }

    #[test]
    fn secret_round_trips_through_keystore_bytes() {
        let kp = NodeKeyPair::generate();
        let restored = NodeKeyPair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(kp.public_bytes(), restored.public_bytes());
        assert_eq!(kp.addr(), restored.addr());
    }
}
