use std::time::Duration;
use uuid::Uuid;

use crate::analysis::AnalysisError;
use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("submission {0} is already being evaluated")]
    Conflict(Uuid),
    #[error("analysis service timed out after {0:?}")]
    UpstreamTimeout(Duration),
    #[error("analysis failed: {0}")]
    UpstreamError(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EvaluationError {
    pub fn submission_not_found(id: Uuid) -> Self {
        Self::NotFound {
            kind: "submission",
            id,
        }
    }

    pub fn assignment_not_found(id: Uuid) -> Self {
        Self::NotFound {
            kind: "assignment",
            id,
        }
    }
}

impl From<AnalysisError> for EvaluationError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Timeout(limit) => Self::UpstreamTimeout(limit),
            other => Self::UpstreamError(other.to_string()),
        }
    }
}
