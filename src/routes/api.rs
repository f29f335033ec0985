use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::response::{success, ApiError};
use crate::db::{NewAssignment, NewSubmission, SubmissionFilter};
use crate::state::AppState;

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("Invalid id '{}'", raw)))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let database = state.store.ping().await;
    let analysis = state.analysis.health().await;

    let status = if database.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if database.is_ok() { "ok" } else { "degraded" },
            "timestamp": chrono::Utc::now(),
            "database": if database.is_ok() { "connected" } else { "unavailable" },
            "analysis_service": if analysis.is_ok() { "reachable" } else { "unreachable" },
        })),
    )
        .into_response()
}

pub async fn create_assignment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewAssignment>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    if body.title.trim().is_empty() || body.description.trim().is_empty() {
        return Err(ApiError::bad_request("Please provide title and description"));
    }
    if body.max_score.is_nan() || body.max_score < 1.0 {
        return Err(ApiError::bad_request("max_score must be at least 1"));
    }

    let assignment = state.store.create_assignment(body).await?;
    tracing::info!(assignment_id = %assignment.id, title = %assignment.title, "Assignment created");
    Ok(success(StatusCode::CREATED, assignment))
}

pub async fn list_assignments(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let assignments = state.store.list_assignments().await?;
    Ok(success(StatusCode::OK, assignments))
}

pub async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&assignment_id)?;
    let assignment = state
        .store
        .get_assignment(id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Assignment not found"))?;
    Ok(success(StatusCode::OK, assignment))
}

pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<SubmissionFilter>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(filter) = filter?;
    let submissions = state.store.list_submissions(filter.assignment_id).await?;
    Ok(success(StatusCode::OK, submissions))
}

pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewSubmission>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let submission = state.store.create_submission(body).await?;
    tracing::info!(
        submission_id = %submission.id,
        assignment_id = %submission.assignment_id,
        "Submission received"
    );
    Ok(success(StatusCode::CREATED, submission))
}

pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&submission_id)?;
    let submission = state
        .store
        .get_submission(id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Submission not found"))?;
    Ok(success(StatusCode::OK, submission))
}

pub async fn trigger_evaluation(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&submission_id)?;
    let outcome = state.evaluator.trigger_evaluation(id).await?;
    Ok(success(StatusCode::OK, outcome))
}

pub async fn get_evaluation(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&submission_id)?;
    let view = state.evaluator.get_evaluation(id).await?;
    Ok(success(StatusCode::OK, view))
}
