//! Prometheus metrics.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

pub static MESSAGES_PROCESSED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "custodia_messages_processed_total",
        "Log messages applied to a round state machine"
    )
    .expect("metric registration is infallible")
});

pub static MESSAGES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "custodia_messages_skipped_total",
        "Log messages skipped without state change",
        &["reason"]
    )
    .expect("metric registration is infallible")
});

pub static COMMITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "custodia_store_commits_total",
        "Transactional store commits"
    )
    .expect("metric registration is infallible")
});

pub static OPERATIONS_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "custodia_operations_pending",
        "Operator work items awaiting an answer"
    )
    .expect("metric registration is infallible")
});

pub static TICK_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "custodia_ingest_tick_seconds",
        "Wall time of one ingestion tick"
    )
    .expect("metric registration is infallible")
});

/// Render the default registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&prometheus::gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record one skipped message.
pub fn record_skip(reason: &str) {
    MESSAGES_SKIPPED.with_label_values(&[reason]).inc();
}
