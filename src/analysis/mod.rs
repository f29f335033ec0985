//! Boundary to the external analysis service that scores submissions and
//! estimates plagiarism risk.
//!
//! The service is unreliable by assumption: every call is bounded by a fixed
//! timeout, performed once, and either yields a fully normalized
//! [`AnalysisResult`] or an [`AnalysisError`].

mod client;

pub use client::HttpAnalysisClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Request body of `POST /evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub submission_id: String,
    pub text: String,
    pub corpus: Vec<String>,
    pub keywords: Vec<String>,
    pub max_score: f64,
}

/// Response body as sent by the service. Every field may be missing or null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisResponse {
    pub plagiarism_risk_numeric: Option<f64>,
    pub score: Option<f64>,
    pub feedback_summary: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl AnalysisResponse {
    pub fn normalize(self) -> AnalysisResult {
        AnalysisResult {
            plagiarism_risk: self.plagiarism_risk_numeric.unwrap_or(0.0),
            score: self.score.unwrap_or(0.0),
            feedback_summary: self.feedback_summary.unwrap_or_default(),
            details: self.details.unwrap_or_else(|| serde_json::json!({})),
        }
    }
}

/// Analysis outcome with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub plagiarism_risk: f64,
    pub score: f64,
    pub feedback_summary: String,
    pub details: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis service did not answer within {0:?}")]
    Timeout(Duration),
    #[error("analysis service unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("analysis service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unusable analysis response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Sends exactly one analysis request. Implementations must not retry.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError>;

    async fn health(&self) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// How a returned score relates to the assignment's maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScorePolicy {
    /// Store the score exactly as returned.
    #[default]
    PassThrough,
    /// Clamp the score into `[0, max_score]`.
    Clamp,
}

impl ScorePolicy {
    pub fn apply(&self, score: f64, max_score: f64) -> f64 {
        match self {
            ScorePolicy::PassThrough => score,
            ScorePolicy::Clamp => score.clamp(0.0, max_score.max(0.0)),
        }
    }
}

impl FromStr for ScorePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass_through" | "passthrough" => Ok(ScorePolicy::PassThrough),
            "clamp" => Ok(ScorePolicy::Clamp),
            other => Err(format!(
                "unknown score policy '{}', expected 'pass_through' or 'clamp'",
                other
            )),
        }
    }
}
