//! Tracing initialization.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the supplied default directive. Validation failures
/// from the ingestion loop land on this stream as structured `warn!` events -
/// that is the diagnostic stream for skipped messages.
pub fn init_telemetry(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
