use crate::infra::{ApiState, AppState};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bank_intake::jobs::{IntakeError, JobId, UploadRequest};
use bank_intake::routing::{Priority, RoutingError};
use serde::Deserialize;
use serde_json::json;

/// JSON upload body. Statement formats are all text, so the content travels as a string.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadPayload {
    pub(crate) department: String,
    pub(crate) process: String,
    pub(crate) file_type: String,
    #[serde(default)]
    pub(crate) priority: Option<Priority>,
    #[serde(default)]
    pub(crate) notes: Option<String>,
    #[serde(default)]
    pub(crate) uploaded_by: Option<String>,
    pub(crate) original_filename: String,
    pub(crate) file_content: String,
}

impl From<UploadPayload> for UploadRequest {
    fn from(payload: UploadPayload) -> Self {
        Self {
            department: payload.department,
            process: payload.process,
            file_type: payload.file_type,
            priority: payload.priority,
            notes: payload.notes,
            uploaded_by: payload.uploaded_by,
            original_filename: payload.original_filename,
            file_bytes: payload.file_content.into_bytes(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApprovalPayload {
    pub(crate) approver: String,
}

pub(crate) fn intake_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/files/upload", post(upload_handler))
        .route("/api/v1/files/jobs", get(jobs_handler))
        .route("/api/v1/files/jobs/:job_id", get(job_handler))
        .route("/api/v1/files/jobs/:job_id/approve", post(approve_handler))
        .route("/api/v1/files/departments", get(departments_handler))
        .route("/api/v1/files/routing-codes", get(routing_codes_handler))
        .route("/api/v1/formats", get(formats_handler))
        .route("/api/v1/activity", get(activity_handler))
        .route("/api/v1/stats", get(stats_handler))
        .with_state(state)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn upload_handler(
    State(state): State<ApiState>,
    Json(payload): Json<UploadPayload>,
) -> Response {
    match state.intake.submit(payload.into()) {
        Ok(receipt) => {
            let message = if receipt.requires_approval {
                "file stored, waiting for approval"
            } else {
                "file stored and queued for processing"
            };
            let body = json!({
                "job_id": receipt.job_id,
                "routing_code": receipt.routing_code,
                "status": receipt.status,
                "requires_approval": receipt.requires_approval,
                "message": message,
            });
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn jobs_handler(State(state): State<ApiState>) -> Response {
    match state.intake.jobs() {
        Ok(jobs) => {
            let body = json!({ "count": jobs.len(), "jobs": jobs });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn job_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.intake.job(&JobId(job_id)) {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn approve_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(payload): Json<ApprovalPayload>,
) -> Response {
    match state.intake.approve(&JobId(job_id), &payload.approver) {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn departments_handler(State(state): State<ApiState>) -> Response {
    let catalog = state.intake.lifecycle().catalog();
    Json(json!({
        "departments": catalog.departments(),
        "file_types": catalog.file_types(),
    }))
    .into_response()
}

pub(crate) async fn routing_codes_handler(State(state): State<ApiState>) -> Response {
    let codes: Vec<String> = state
        .intake
        .routing_codes()
        .iter()
        .map(ToString::to_string)
        .collect();
    Json(json!({ "count": codes.len(), "routing_codes": codes })).into_response()
}

pub(crate) async fn formats_handler(State(state): State<ApiState>) -> Response {
    Json(json!({ "formats": state.registry.supported_formats() })).into_response()
}

pub(crate) async fn activity_handler(State(state): State<ApiState>) -> Response {
    Json(json!({ "events": state.activity.recent() })).into_response()
}

pub(crate) async fn stats_handler(State(state): State<ApiState>) -> Response {
    Json(state.monitor.snapshot()).into_response()
}

fn error_response(err: IntakeError) -> Response {
    let status = match &err {
        IntakeError::BadInput(_) => StatusCode::BAD_REQUEST,
        IntakeError::InvalidRouting(_) => StatusCode::UNPROCESSABLE_ENTITY,
        IntakeError::NotFound(_) => StatusCode::NOT_FOUND,
        IntakeError::Conflict(_) => StatusCode::CONFLICT,
        IntakeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut payload = json!({ "error": err.to_string() });
    if let IntakeError::InvalidRouting(routing) = &err {
        payload["level"] = json!(routing_level(routing));
    }
    (status, Json(payload)).into_response()
}

fn routing_level(err: &RoutingError) -> &'static str {
    match err {
        RoutingError::UnknownDepartment { .. } => "department",
        RoutingError::UnknownProcess { .. } => "process",
        RoutingError::UnsupportedFileType { .. } => "file_type",
        RoutingError::ApprovalRequiredForDrop(_) => "department",
    }
}
