//! Node configuration.
//!
//! TOML file with CLI overrides. Example:
//!
//! ```toml
//! [node]
//! username = "alice"
//! data_dir = "./data"
//!
//! [log]
//! segment_path = "./shared/log.jsonl"
//!
//! [api]
//! listen_addr = "127.0.0.1:8080"
//! ```

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub api: ApiSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// Operator name, matched against the key file.
    pub username: String,

    /// Data directory for the state store and default file locations.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Path to the node key file; defaults to `<data_dir>/keys.json`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogSection {
    /// Path to the shared log segment; defaults to `<data_dir>/log.jsonl`.
    ///
    /// Every participant's node must point at the same logical log. With the
    /// file transport that means a shared filesystem path; a Kafka-style
    /// adapter replaces this section entirely.
    #[serde(default)]
    pub segment_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().expect("static address parses")
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn key_path(&self) -> PathBuf {
        self.node
            .key_path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("keys.json"))
    }

    pub fn segment_path(&self) -> PathBuf {
        self.log
            .segment_path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("log.jsonl"))
    }

    pub fn state_path(&self) -> PathBuf {
        self.node.data_dir.join("state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [node]
            username = "alice"
            "#,
        )
        .unwrap();
        assert_eq!(config.node.username, "alice");
        assert_eq!(config.key_path(), PathBuf::from("./data/keys.json"));
        assert_eq!(config.segment_path(), PathBuf::from("./data/log.jsonl"));
        assert_eq!(config.api.listen_addr.port(), 8080);
    }

    #[test]
    fn overrides_win() {
        let config: NodeConfig = toml::from_str(
            r#"
            [node]
            username = "bob"
            data_dir = "/var/lib/custodia"
            key_path = "/etc/custodia/bob.json"

            [log]
            segment_path = "/mnt/shared/log.jsonl"

            [api]
            listen_addr = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.key_path(), PathBuf::from("/etc/custodia/bob.json"));
        assert_eq!(
            config.segment_path(),
            PathBuf::from("/mnt/shared/log.jsonl")
        );
        assert_eq!(config.state_path(), PathBuf::from("/var/lib/custodia/state"));
        assert_eq!(config.api.listen_addr.port(), 9000);
    }
}
