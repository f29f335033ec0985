mod api;
mod response;

pub use api::*;
pub use response::ApiError;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/assignments", get(list_assignments).post(create_assignment))
        .route("/api/assignments/:assignment_id", get(get_assignment))
        .route(
            "/api/submissions",
            get(list_submissions).post(create_submission),
        )
        .route("/api/submissions/:submission_id", get(get_submission))
        .route(
            "/api/evaluate/:submission_id",
            post(trigger_evaluation).get(get_evaluation),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
