use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::StoreError;
use crate::evaluation::EvaluationError;

/// `{ "success": true, "data": ... }` with the given status code.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": true,
            "data": data,
        })),
    )
        .into_response()
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "success": false,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateSubmission { .. } => {
                Self::bad_request("You have already submitted this assignment")
            }
            StoreError::UnknownAssignment(_) => {
                Self::new(StatusCode::NOT_FOUND, "Assignment not found")
            }
            other => {
                tracing::error!(error = %other, "Store failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
        }
    }
}

impl From<EvaluationError> for ApiError {
    fn from(err: EvaluationError) -> Self {
        match err {
            EvaluationError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            EvaluationError::Conflict(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            EvaluationError::UpstreamTimeout(_) => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, format!("ML evaluation failed: {}", err))
            }
            EvaluationError::UpstreamError(_) => {
                Self::new(StatusCode::BAD_GATEWAY, format!("ML evaluation failed: {}", err))
            }
            EvaluationError::Store(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}
