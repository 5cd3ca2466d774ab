//! Route table.

use super::handlers;
use crate::service::NodeService;
use axum::routing::{get, post};
use axum::Router;

/// Build the control-surface router.
pub fn router(service: NodeService) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_text))
        .route(
            "/api/v1/operations",
            get(handlers::list_operations).post(handlers::process_operation),
        )
        .route("/api/v1/operations/:id", get(handlers::get_operation))
        .route(
            "/api/v1/approve_participation",
            post(handlers::approve_participation),
        )
        .route(
            "/api/v1/rounds",
            get(handlers::list_rounds).post(handlers::start_round),
        )
        .route("/api/v1/signing_proposals", post(handlers::propose_signing))
        .route(
            "/api/v1/signatures/:round_id",
            get(handlers::archive_for_round),
        )
        .route(
            "/api/v1/signatures/:round_id/:signing_id",
            get(handlers::archive_entry),
        )
        .route("/api/v1/reset_state", post(handlers::reset_state))
        .with_state(service)
}
