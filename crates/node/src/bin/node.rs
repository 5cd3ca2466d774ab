//! Custodia node binary.
//!
//! # Usage
//!
//! ```bash
//! # Generate the operator key file
//! custodia-node --config node.toml gen-keys
//!
//! # Run the node
//! custodia-node --config node.toml
//!
//! # Override the data directory
//! custodia-node --config node.toml --data-dir /var/lib/custodia
//! ```
//!
//! Exit codes: `0` clean shutdown, `1` unrecoverable store error, `2` crypto
//! misconfiguration, `3` log transport unrecoverable.

use clap::{Parser, Subcommand};
use custodia_node::rpc::{self, RpcServerConfig};
use custodia_node::{
    init_telemetry, FileKeyStore, FileLog, KeyStore, NodeConfig, NodeService, RocksStore,
    ServiceError,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

const EXIT_OK: i32 = 0;
const EXIT_STORE: i32 = 1;
const EXIT_CRYPTO: i32 = 2;
const EXIT_TRANSPORT: i32 = 3;

/// Custodia distributed-custody signing node.
#[derive(Parser, Debug)]
#[command(name = "custodia-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long)]
    config: PathBuf,

    /// Data directory (overrides config).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Node key file (overrides config).
    #[arg(long)]
    key: Option<PathBuf>,

    /// Control-surface listen address (overrides config).
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node (default).
    Run,
    /// Generate the operator key file and print the participant entry.
    GenKeys,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_telemetry(&cli.log_level);
    std::process::exit(real_main(cli).await);
}

async fn real_main(cli: Cli) -> i32 {
    let mut config = match NodeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, path = %cli.config.display(), "failed to load configuration");
            return EXIT_STORE;
        }
    };
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }
    if let Some(key) = cli.key {
        config.node.key_path = Some(key);
    }
    if let Some(listen_addr) = cli.listen_addr {
        config.api.listen_addr = listen_addr;
    }

    let keystore = FileKeyStore::new(config.key_path());

    if matches!(cli.command, Some(Command::GenKeys)) {
        return match keystore.init(&config.node.username) {
            Ok(keypair) => {
                info!(
                    username = %config.node.username,
                    addr = %keypair.addr(),
                    verify_key = %hex::encode(keypair.public_bytes()),
                    key_path = %config.key_path().display(),
                    "key file written"
                );
                EXIT_OK
            }
            Err(err) => {
                error!(%err, "failed to write key file");
                EXIT_CRYPTO
            }
        };
    }

    let keypair = match keystore.load_keypair(&config.node.username) {
        Ok(keypair) => keypair,
        Err(err) => {
            error!(%err, "failed to load the node key");
            return EXIT_CRYPTO;
        }
    };
    info!(username = %config.node.username, addr = %keypair.addr(), "node identity loaded");

    let store = match RocksStore::open(config.state_path()) {
        Ok(store) => store,
        Err(err) => {
            error!(%err, path = %config.state_path().display(), "failed to open the state store");
            return EXIT_STORE;
        }
    };

    let log = match FileLog::open(config.segment_path()) {
        Ok(log) => Arc::new(log),
        Err(err) => {
            error!(%err, path = %config.segment_path().display(), "failed to open the log segment");
            return EXIT_TRANSPORT;
        }
    };

    let service = NodeService::new(Box::new(store), log, keypair, config.node.username.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rpc_task = tokio::spawn(rpc::serve(
        RpcServerConfig {
            listen_addr: config.api.listen_addr,
        },
        service.clone(),
        shutdown_rx.clone(),
    ));
    let ingest_service = service.clone();
    let ingest_rx = shutdown_rx.clone();
    let mut ingest_task = tokio::spawn(async move { ingest_service.run(ingest_rx).await });

    let code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
            // The in-flight tick completes or rolls back before the loop exits.
            classify_ingest_exit(ingest_task.await)
        }
        result = &mut ingest_task => {
            let _ = shutdown_tx.send(true);
            classify_ingest_exit(result)
        }
    };
    let _ = rpc_task.await;
    code
}

fn classify_ingest_exit(
    result: Result<Result<(), ServiceError>, tokio::task::JoinError>,
) -> i32 {
    match result {
        Ok(Ok(())) => EXIT_OK,
        Ok(Err(ServiceError::Log(err))) => {
            error!(%err, "log transport unrecoverable");
            EXIT_TRANSPORT
        }
        Ok(Err(err)) => {
            error!(%err, "node stopped on unrecoverable error");
            EXIT_STORE
        }
        Err(err) => {
            error!(%err, "ingestion task panicked");
            EXIT_STORE
        }
    }
}
