//! Endpoint handlers.

use super::types::*;
use crate::metrics;
use crate::service::{NodeService, ResetRequest, RoundSummary};
use axum::extract::{Path, State};
use axum::Json;
use custodia_types::{DkgRoundId, SigningEntry, SigningId};
use uuid::Uuid;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn metrics_text() -> String {
    metrics::gather()
}

pub async fn list_operations(
    State(service): State<NodeService>,
) -> Result<Json<Vec<OperationDto>>, ApiError> {
    let operations = service.list_operations().await?;
    Ok(Json(operations.into_iter().map(OperationDto::from).collect()))
}

pub async fn get_operation(
    State(service): State<NodeService>,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationDto>, ApiError> {
    Ok(Json(service.get_operation(id).await?.into()))
}

pub async fn process_operation(
    State(service): State<NodeService>,
    Json(request): Json<ProcessOperationRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    service
        .process_operation(request.operation_id, request.result)
        .await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn approve_participation(
    State(service): State<NodeService>,
    Json(request): Json<ApproveParticipationRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    service.approve_participation(request.operation_id).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn list_rounds(
    State(service): State<NodeService>,
) -> Result<Json<Vec<RoundSummary>>, ApiError> {
    Ok(Json(service.list_rounds().await?))
}

pub async fn start_round(
    State(service): State<NodeService>,
    Json(request): Json<StartRoundRequest>,
) -> Result<Json<StartRoundResponse>, ApiError> {
    if request.participants.is_empty() {
        return Err(ApiError::bad_request("participant list must not be empty"));
    }
    let round_id = service
        .start_round(request.participants, request.threshold)
        .await?;
    Ok(Json(StartRoundResponse { round_id }))
}

pub async fn propose_signing(
    State(service): State<NodeService>,
    Json(request): Json<ProposeSigningRequest>,
) -> Result<Json<ProposeSigningResponse>, ApiError> {
    let signing_id = service
        .propose_signing(request.round_id, request.payload)
        .await?;
    Ok(Json(ProposeSigningResponse { signing_id }))
}

pub async fn archive_for_round(
    State(service): State<NodeService>,
    Path(round_id): Path<String>,
) -> Result<Json<Vec<SigningEntry>>, ApiError> {
    Ok(Json(
        service.signing_archive(DkgRoundId::new(round_id)).await?,
    ))
}

pub async fn archive_entry(
    State(service): State<NodeService>,
    Path((round_id, signing_id)): Path<(String, String)>,
) -> Result<Json<SigningEntry>, ApiError> {
    let round_id = DkgRoundId::new(round_id);
    let signing_id = SigningId::new(signing_id);
    service
        .signing_archive_entry(round_id.clone(), signing_id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError {
            status: axum::http::StatusCode::NOT_FOUND,
            error: format!("no archive entry for {round_id}/{signing_id}"),
        })
}

pub async fn reset_state(
    State(service): State<NodeService>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<ResetStateResponse>, ApiError> {
    let new_state_path = service.reset_state(request).await?;
    Ok(Json(ResetStateResponse { new_state_path }))
}
