//! REST API handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use dormant_core::{Disposition, Timestamp};
use dormant_controller::{ControllerError, EventOutcome};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn not_found(err: ControllerError) -> axum::response::Response {
    error_response(&err.to_string(), StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
struct Reported {
    resource_id: String,
    last_seen: Timestamp,
}

#[derive(Debug, Serialize)]
struct Activation {
    resource_id: String,
    disposition: Disposition,
}

/// Body of `POST /api/v1/events`. `at` defaults to now.
#[derive(Debug, Deserialize)]
pub struct EventBody {
    pub identifier: String,
    pub at: Option<Timestamp>,
    pub status: Option<u16>,
}

#[derive(Debug, Serialize)]
struct EventAccepted {
    resource_id: String,
    escalated: bool,
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /api/v1/resources
pub async fn list_resources(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.all_statuses())
}

/// GET /api/v1/resources/{id}
pub async fn get_resource(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.controller.status(&id) {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("resource not configured", StatusCode::NOT_FOUND),
    }
}

/// POST /api/v1/resources/{id}/report
pub async fn report_activity(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.controller.report_activity(&id) {
        Ok(last_seen) => ApiResponse::ok(Reported {
            resource_id: id,
            last_seen,
        })
        .into_response(),
        Err(e) => not_found(e),
    }
}

/// POST /api/v1/resources/{id}/activate
///
/// 200 when the resource is running, 503 when the start failed or timed
/// out. Either way the body carries the disposition.
pub async fn activate(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.controller.ensure_active(&id).await {
        Ok(disposition) => {
            let status = if disposition.is_ready() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                ApiResponse::ok(Activation {
                    resource_id: id,
                    disposition,
                }),
            )
                .into_response()
        }
        Err(e) => not_found(e),
    }
}

/// GET /api/v1/classifications
pub async fn classifications(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.all_classifications())
}

/// POST /api/v1/events
pub async fn submit_event(State(state): State<ApiState>, Json(body): Json<EventBody>) -> impl IntoResponse {
    let at = body.at.unwrap_or_else(|| state.controller.now());
    match state.controller.on_activity_event(&body.identifier, at, body.status) {
        EventOutcome::Unmatched => error_response("no rule matched", StatusCode::NOT_FOUND),
        EventOutcome::Recorded { resource_id } => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(EventAccepted {
                resource_id,
                escalated: false,
            }),
        )
            .into_response(),
        EventOutcome::Escalating { resource_id, .. } => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(EventAccepted {
                resource_id,
                escalated: true,
            }),
        )
            .into_response(),
    }
}

/// GET /api/v1/activations
pub async fn list_activations(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.activations())
}
