//! HTTP boundary. Handlers are thin: blocking work goes to
//! `spawn_blocking`, and every desk error maps to a status code in one place.

use crate::attendance::{AttendanceDesk, DeskError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{AddOutcome, CheckIn, GateSnapshot, StatusChannel};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

const ROUTE_INDEX: &str = "\
rollcall
GET  /detection_status
POST /reset_status
POST /attendance
POST /enroll
POST /students
GET  /api/students
GET  /api/attendance
GET  /api/attendance/{query}
GET  /api/status
POST /shutdown
";

#[derive(Clone)]
pub struct AppState {
    pub desk: Arc<AttendanceDesk>,
    pub gate: StatusChannel,
    pub shutdown: Arc<Notify>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DeskError> for ApiError {
    fn from(e: DeskError) -> Self {
        match e {
            DeskError::InvalidImage(_) | DeskError::NoFace | DeskError::MultipleFaces(_) => {
                Self::BadRequest(e.to_string())
            }
            DeskError::Roster(rollcall_core::RosterError::EmptyField) => Self::BadRequest(e.to_string()),
            DeskError::UnknownIdentity(_) => Self::NotFound(e.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    #[serde(alias = "id")]
    pub student_id: String,
    pub name: String,
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct StudentRequest {
    #[serde(alias = "id")]
    pub student_id: String,
    pub name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/detection_status", get(detection_status))
        .route("/reset_status", post(reset_status))
        .route("/attendance", post(attendance))
        .route("/enroll", post(enroll))
        .route("/students", post(add_student))
        .route("/api/students", get(students))
        .route("/api/attendance", get(records))
        .route("/api/attendance/:query", get(history))
        .route("/api/status", get(status))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

async fn index() -> &'static str {
    ROUTE_INDEX
}

async fn detection_status(State(state): State<AppState>) -> Json<GateSnapshot> {
    Json(state.gate.snapshot())
}

async fn reset_status(State(state): State<AppState>) -> Json<GateSnapshot> {
    state.gate.reset();
    tracing::info!("gate status reset");
    Json(state.gate.snapshot())
}

async fn attendance(
    State(state): State<AppState>,
    Json(req): Json<ImageRequest>,
) -> Result<Response, ApiError> {
    let outcome = blocking(state.desk, move |desk| desk.check_in_image(&req.image)).await?;
    let (status, body) = check_in_response(&outcome);
    Ok((status, Json(body)).into_response())
}

async fn enroll(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<Value>, ApiError> {
    let enrolled = blocking(state.desk, move |desk| {
        desk.enroll(&req.student_id, &req.name, &req.image)
    })
    .await?;
    Ok(Json(json!({
        "status": "enrolled",
        "identity": enrolled.identity,
        "encodings": enrolled.encodings,
    })))
}

async fn add_student(
    State(state): State<AppState>,
    Json(req): Json<StudentRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = blocking(state.desk, move |desk| desk.add_student(&req.student_id, &req.name)).await?;
    let (status, student) = match outcome {
        AddOutcome::Added(s) => ("added", s),
        AddOutcome::AlreadyPresent(s) => ("exists", s),
    };
    Ok(Json(json!({ "status": status, "student": student })))
}

async fn students(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let list = blocking(state.desk, |desk| desk.students()).await?;
    Ok(Json(json!({ "count": list.len(), "students": list })))
}

async fn records(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = blocking(state.desk, |desk| desk.records()).await?;
    Ok(Json(json!({ "count": records.len(), "records": records })))
}

async fn history(
    State(state): State<AppState>,
    Path(query): Path<String>,
) -> Result<Response, ApiError> {
    let lookup = blocking(state.desk, move |desk| desk.history(&query)).await?;
    let status = match lookup {
        rollcall_core::HistoryLookup::Found(_) => StatusCode::OK,
        _ => StatusCode::NOT_FOUND,
    };
    Ok((status, Json(lookup)).into_response())
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let gate = state.gate.snapshot();
    let status = blocking(state.desk, move |desk| Ok(desk.status(&gate))).await?;
    Ok(Json(json!(status)))
}

async fn shutdown(State(state): State<AppState>) -> Json<Value> {
    tracing::info!("shutdown requested over HTTP");
    state.shutdown.notify_one();
    Json(json!({ "status": "shutting_down" }))
}

/// Map a check-in outcome to its status code and JSON body.
pub fn check_in_response(outcome: &CheckIn) -> (StatusCode, Value) {
    match outcome {
        CheckIn::Marked {
            identity,
            distance,
            record,
        } => (
            StatusCode::OK,
            json!({ "status": "marked", "identity": identity, "distance": distance, "timestamp": record.timestamp }),
        ),
        CheckIn::Duplicate {
            identity,
            distance,
            record,
        } => (
            StatusCode::OK,
            json!({ "status": "duplicate", "identity": identity, "distance": distance, "timestamp": record.timestamp }),
        ),
        CheckIn::Unrecognized {
            nearest,
            best_distance,
        } => (
            StatusCode::NOT_FOUND,
            json!({ "status": "unrecognized", "nearest": nearest, "best_distance": best_distance }),
        ),
        CheckIn::NoCandidates => (
            StatusCode::BAD_REQUEST,
            json!({ "status": "no_candidates", "error": "no identities enrolled" }),
        ),
        CheckIn::NoFace => (
            StatusCode::BAD_REQUEST,
            json!({ "status": "no_face", "error": "no face detected" }),
        ),
        CheckIn::MultipleFaces { count } => (
            StatusCode::BAD_REQUEST,
            json!({ "status": "multiple_faces", "error": "exactly one face is required", "count": count }),
        ),
    }
}

async fn blocking<T, F>(desk: Arc<AttendanceDesk>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AttendanceDesk) -> Result<T, DeskError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&desk))
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}
