//! HTTP server lifecycle.

use super::routes::router;
use crate::service::NodeService;
use std::net::SocketAddr;
use tokio::sync::watch;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub listen_addr: SocketAddr,
}

/// Serve the control surface until `shutdown` flips.
pub async fn serve(
    config: RpcServerConfig,
    service: NodeService,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "control surface listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
