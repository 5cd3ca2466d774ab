//! Node identity keystore.
//!
//! The ed25519 keypair is loaded once at startup and held in memory; it never
//! enters the state store. Encrypting the key file is an external concern
//! (whole-disk or keystore-level); the file permissions are tightened to the
//! owner regardless.

use custodia_crypto::NodeKeyPair;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures here are the fatal crypto-misconfiguration class (exit code 2).
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key file not found: {0}")]
    NotFound(PathBuf),
    #[error("key file i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed key file: {0}")]
    Malformed(String),
    #[error("key file belongs to {found}, expected {expected}")]
    WrongUser { expected: String, found: String },
}

/// Narrow capability interface; tests substitute an in-memory fake.
pub trait KeyStore {
    fn load_keypair(&self, username: &str) -> Result<NodeKeyPair, KeyStoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    username: String,
    #[serde(with = "hex")]
    secret_key: Vec<u8>,
}

/// JSON key file on disk.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Generate a fresh keypair and write the key file (owner-only on unix).
    pub fn init(&self, username: &str) -> Result<NodeKeyPair, KeyStoreError> {
        let keypair = NodeKeyPair::generate();
        let record = KeyFile {
            username: username.to_owned(),
            secret_key: keypair.secret_bytes().to_vec(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| KeyStoreError::Malformed(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(keypair)
    }
}

impl KeyStore for FileKeyStore {
    fn load_keypair(&self, username: &str) -> Result<NodeKeyPair, KeyStoreError> {
        if !self.path.exists() {
            return Err(KeyStoreError::NotFound(self.path.clone()));
        }
        let record: KeyFile = serde_json::from_slice(&std::fs::read(&self.path)?)
            .map_err(|e| KeyStoreError::Malformed(e.to_string()))?;
        if record.username != username {
            return Err(KeyStoreError::WrongUser {
                expected: username.to_owned(),
                found: record.username,
            });
        }
        NodeKeyPair::from_secret_bytes(&record.secret_key)
            .map_err(|e| KeyStoreError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys/alice.json"));
        let generated = store.init("alice").unwrap();
        let loaded = store.load_keypair("alice").unwrap();
        assert_eq!(generated.public_bytes(), loaded.public_bytes());
    }

    #[test]
    fn wrong_username_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("alice.json"));
        store.init("alice").unwrap();
        assert!(matches!(
            store.load_keypair("bob"),
            Err(KeyStoreError::WrongUser { .. })
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let store = FileKeyStore::new("/nonexistent/key.json");
        assert!(matches!(
            store.load_keypair("alice"),
            Err(KeyStoreError::NotFound(_))
        ));
    }
}
