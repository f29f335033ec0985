use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::StoreError;

/// Lifecycle status of a submission.
///
/// `Pending -> Evaluating -> {Evaluated, Failed}`, with `Failed -> Evaluating`
/// allowed for retries. `Evaluated` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Evaluating,
    Evaluated,
    Failed,
}

impl SubmissionStatus {
    /// Statuses from which the guarded transition into `Evaluating` may start.
    pub const EVALUATION_SOURCES: &'static [SubmissionStatus] =
        &[SubmissionStatus::Pending, SubmissionStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Evaluating => "evaluating",
            SubmissionStatus::Evaluated => "evaluated",
            SubmissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Evaluated | SubmissionStatus::Failed)
    }

    pub fn can_begin_evaluation(&self) -> bool {
        Self::EVALUATION_SOURCES.contains(self)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "evaluating" => Ok(SubmissionStatus::Evaluating),
            "evaluated" => Ok(SubmissionStatus::Evaluated),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown submission status '{}'", other))),
        }
    }
}

/// Outcome recorded once the analysis service has scored a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub plagiarism_risk: f64,
    pub score: f64,
    pub feedback_summary: String,
    /// Free-form document produced by the analysis service.
    pub details: serde_json::Value,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    pub text_content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub status: SubmissionStatus,
    /// Present iff `status == Evaluated`.
    pub evaluation: Option<Evaluation>,
    /// Bumped every time an evaluation attempt takes the submission into
    /// `Evaluating`. Terminal writes and lock hand-backs must quote it.
    pub attempt: i64,
    pub status_changed_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub max_score: f64,
    pub created_at: DateTime<Utc>,
}

/// A conditional status update that applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// Status the update replaced.
    pub previous: SubmissionStatus,
    /// Attempt number the submission carries after the update.
    pub attempt: i64,
}

/// Filter for `GET /api/submissions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionFilter {
    #[serde(default, alias = "assignmentId")]
    pub assignment_id: Option<Uuid>,
}

/// A peer submission's text, as fed into the plagiarism corpus.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CorpusEntry {
    pub id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubmission {
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAssignment {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_max_score() -> f64 {
    100.0
}

/// Raw `submissions` row; evaluation columns are flattened and nullable.
#[derive(Debug, FromRow)]
pub(crate) struct SubmissionRow {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    pub text_content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub status: String,
    pub plagiarism_risk: Option<f64>,
    pub score: Option<f64>,
    pub feedback_summary: Option<String>,
    pub details: Option<serde_json::Value>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub attempt: i64,
    pub status_changed_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        let status: SubmissionStatus = row.status.parse()?;

        let evaluation = match (status, row.evaluated_at) {
            (SubmissionStatus::Evaluated, Some(evaluated_at)) => Some(Evaluation {
                plagiarism_risk: row.plagiarism_risk.unwrap_or(0.0),
                score: row.score.unwrap_or(0.0),
                feedback_summary: row.feedback_summary.unwrap_or_default(),
                details: row.details.unwrap_or_else(|| serde_json::json!({})),
                evaluated_at,
            }),
            (SubmissionStatus::Evaluated, None) => {
                return Err(StoreError::Corrupt(format!(
                    "submission {} is evaluated but has no evaluation",
                    row.id
                )))
            }
            _ => None,
        };

        Ok(Self {
            id: row.id,
            assignment_id: row.assignment_id,
            student_id: row.student_id,
            text_content: row.text_content,
            file_url: row.file_url,
            file_name: row.file_name,
            status,
            evaluation,
            attempt: row.attempt,
            status_changed_at: row.status_changed_at,
            submitted_at: row.submitted_at,
        })
    }
}
