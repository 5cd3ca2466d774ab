//! Request and response DTOs for the control surface.

use crate::service::ServiceError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use custodia_types::{DkgRoundId, Operation, ParticipantAddr, ProposalParticipant, SigningId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error envelope returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::OperationNotFound(_) | ServiceError::UnknownRound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::InvalidRequest(_) | ServiceError::InvalidOperationResult(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Store(_) | ServiceError::Log(_) | ServiceError::Crypto(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            error: err.to_string(),
        }
    }
}

/// Operator work item as exposed to the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDto {
    pub id: Uuid,
    pub kind: String,
    pub round_id: DkgRoundId,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    pub created_at_ms: u64,
    pub to: Vec<ParticipantAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl From<Operation> for OperationDto {
    fn from(op: Operation) -> Self {
        Self {
            id: op.id,
            kind: op.kind.as_str().to_owned(),
            round_id: op.round_id,
            payload: op.payload,
            created_at_ms: op.created_at_ms,
            to: op.to,
            extra: op.extra,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProcessOperationRequest {
    pub operation_id: Uuid,
    #[serde(with = "hex")]
    pub result: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveParticipationRequest {
    pub operation_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct StartRoundRequest {
    pub participants: Vec<ProposalParticipant>,
    pub threshold: u16,
}

#[derive(Debug, Serialize)]
pub struct StartRoundResponse {
    pub round_id: DkgRoundId,
}

#[derive(Debug, Deserialize)]
pub struct ProposeSigningRequest {
    pub round_id: DkgRoundId,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct ProposeSigningResponse {
    pub signing_id: SigningId,
}

#[derive(Debug, Serialize)]
pub struct ResetStateResponse {
    pub new_state_path: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub status: &'static str,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}
