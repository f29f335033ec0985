mod memory;
mod models;

pub use memory::MemoryStore;
pub use models::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub type DbPool = Arc<PgPool>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("student {student_id} has already submitted assignment {assignment_id}")]
    DuplicateSubmission { assignment_id: Uuid, student_id: Uuid },
    #[error("assignment {0} does not exist")]
    UnknownAssignment(Uuid),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Persistence contract for submissions and their evaluation outcome.
///
/// Every status write goes through a conditional update, so an implementation
/// must apply each of `conditional_set_status`, `reclaim_stale`,
/// `set_evaluation_result` and `release_evaluation` atomically with respect to
/// the others. None of them may move a submission out of `Evaluated`.
///
/// Entering `Evaluating` bumps the submission's `attempt`. The writes that end
/// an attempt only apply while `attempt` still matches, so an attempt that was
/// reclaimed as stale can no longer touch the row.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>>;

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>>;

    /// All assignments, newest first.
    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>>;

    /// Submissions newest first, optionally restricted to one assignment.
    async fn list_submissions(&self, assignment_id: Option<Uuid>) -> StoreResult<Vec<Submission>>;

    /// Other submissions of `assignment_id` in creation order, without `exclude_id`.
    async fn list_by_assignment(
        &self,
        assignment_id: Uuid,
        exclude_id: Uuid,
        non_empty_text_only: bool,
    ) -> StoreResult<Vec<CorpusEntry>>;

    /// Sets `new_status` only if the current status is one of `expected`.
    /// Returns the replaced status and resulting attempt, or `None` if the
    /// update did not apply.
    async fn conditional_set_status(
        &self,
        id: Uuid,
        expected: &[SubmissionStatus],
        new_status: SubmissionStatus,
    ) -> StoreResult<Option<StatusChange>>;

    /// Takes over an `Evaluating` submission whose last transition happened
    /// before `stale_before`. The status stays `Evaluating`; the transition
    /// timestamp is refreshed and the new attempt number is returned.
    async fn reclaim_stale(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<i64>>;

    /// Terminal write of evaluation attempt `attempt`. Applies only while the
    /// submission is `Evaluating` under that attempt; `evaluation` must be
    /// present iff `new_status` is `Evaluated`.
    async fn set_evaluation_result(
        &self,
        id: Uuid,
        attempt: i64,
        evaluation: Option<&Evaluation>,
        new_status: SubmissionStatus,
    ) -> StoreResult<bool>;

    /// Abandons evaluation attempt `attempt`, putting back `restore`
    /// (`Pending` or `Failed`). Same guard as `set_evaluation_result`.
    async fn release_evaluation(
        &self,
        id: Uuid,
        attempt: i64,
        restore: SubmissionStatus,
    ) -> StoreResult<bool>;

    async fn create_assignment(&self, new: NewAssignment) -> StoreResult<Assignment>;

    async fn create_submission(&self, new: NewSubmission) -> StoreResult<Submission>;

    async fn ping(&self) -> StoreResult<()>;

    async fn close(&self);
}

pub(crate) fn check_terminal_write(
    evaluation: Option<&Evaluation>,
    new_status: SubmissionStatus,
) -> StoreResult<()> {
    if !new_status.is_terminal() {
        return Err(StoreError::InvalidTransition(format!(
            "'{}' does not end an evaluation",
            new_status
        )));
    }
    if (new_status == SubmissionStatus::Evaluated) != evaluation.is_some() {
        return Err(StoreError::InvalidTransition(format!(
            "cannot finish an evaluation as '{}' {} a result",
            new_status,
            if evaluation.is_some() { "with" } else { "without" }
        )));
    }
    Ok(())
}

pub(crate) fn check_release(restore: SubmissionStatus) -> StoreResult<()> {
    if restore.can_begin_evaluation() {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition(format!(
            "cannot hand an evaluation back as '{}'",
            restore
        )))
    }
}

fn status_strings(statuses: &[SubmissionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// PostgreSQL-backed store. Each conditional update is a single `UPDATE`
/// statement, serialized per row by PostgreSQL's row locks.
#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: DbPool,
}

impl PgSubmissionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        let row = sqlx::query_as::<_, SubmissionRow>("SELECT * FROM submissions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(Submission::try_from).transpose()
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        let assignment =
            sqlx::query_as::<_, Assignment>("SELECT * FROM assignments WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.as_ref())
                .await?;
        Ok(assignment)
    }

    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        let assignments = sqlx::query_as::<_, Assignment>(
            "SELECT * FROM assignments ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(assignments)
    }

    async fn list_submissions(&self, assignment_id: Option<Uuid>) -> StoreResult<Vec<Submission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            r#"
            SELECT * FROM submissions
            WHERE $1::uuid IS NULL OR assignment_id = $1
            ORDER BY submitted_at DESC, id DESC
            "#,
        )
        .bind(assignment_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(Submission::try_from).collect()
    }

    async fn list_by_assignment(
        &self,
        assignment_id: Uuid,
        exclude_id: Uuid,
        non_empty_text_only: bool,
    ) -> StoreResult<Vec<CorpusEntry>> {
        let entries = sqlx::query_as::<_, CorpusEntry>(
            r#"
            SELECT id, text_content AS text
            FROM submissions
            WHERE assignment_id = $1
              AND id <> $2
              AND (NOT $3 OR text_content <> '')
            ORDER BY submitted_at, id
            "#,
        )
        .bind(assignment_id)
        .bind(exclude_id)
        .bind(non_empty_text_only)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(entries)
    }

    async fn conditional_set_status(
        &self,
        id: Uuid,
        expected: &[SubmissionStatus],
        new_status: SubmissionStatus,
    ) -> StoreResult<Option<StatusChange>> {
        if new_status == SubmissionStatus::Evaluated {
            return Err(StoreError::InvalidTransition(
                "'evaluated' is only reachable through set_evaluation_result".to_string(),
            ));
        }

        // The locked subquery exposes the pre-update status to RETURNING.
        let changed = sqlx::query_as::<_, (String, i64)>(
            r#"
            UPDATE submissions AS s
            SET status = $3,
                status_changed_at = $4,
                attempt = s.attempt + CASE WHEN $3 = 'evaluating' THEN 1 ELSE 0 END
            FROM (SELECT id, status FROM submissions WHERE id = $1 FOR UPDATE) AS prior
            WHERE s.id = prior.id
              AND prior.status = ANY($2)
              AND prior.status <> 'evaluated'
            RETURNING prior.status, s.attempt
            "#,
        )
        .bind(id)
        .bind(status_strings(expected))
        .bind(new_status.as_str())
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        changed
            .map(|(previous, attempt)| {
                Ok(StatusChange {
                    previous: previous.parse()?,
                    attempt,
                })
            })
            .transpose()
    }

    async fn reclaim_stale(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        let attempt = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE submissions
            SET status_changed_at = $3, attempt = attempt + 1
            WHERE id = $1
              AND status = 'evaluating'
              AND status_changed_at < $2
            RETURNING attempt
            "#,
        )
        .bind(id)
        .bind(stale_before)
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(attempt)
    }

    async fn set_evaluation_result(
        &self,
        id: Uuid,
        attempt: i64,
        evaluation: Option<&Evaluation>,
        new_status: SubmissionStatus,
    ) -> StoreResult<bool> {
        check_terminal_write(evaluation, new_status)?;

        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = $3,
                plagiarism_risk = $4,
                score = $5,
                feedback_summary = $6,
                details = $7,
                evaluated_at = $8,
                status_changed_at = $9
            WHERE id = $1 AND status = 'evaluating' AND attempt = $2
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(new_status.as_str())
        .bind(evaluation.map(|e| e.plagiarism_risk))
        .bind(evaluation.map(|e| e.score))
        .bind(evaluation.map(|e| e.feedback_summary.as_str()))
        .bind(evaluation.map(|e| &e.details))
        .bind(evaluation.map(|e| e.evaluated_at))
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_evaluation(
        &self,
        id: Uuid,
        attempt: i64,
        restore: SubmissionStatus,
    ) -> StoreResult<bool> {
        check_release(restore)?;

        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = $3, status_changed_at = $4
            WHERE id = $1 AND status = 'evaluating' AND attempt = $2
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(restore.as_str())
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_assignment(&self, new: NewAssignment) -> StoreResult<Assignment> {
        let assignment = sqlx::query_as::<_, Assignment>(
            r#"
            INSERT INTO assignments (id, title, description, keywords, max_score)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.keywords)
        .bind(new.max_score)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(assignment)
    }

    async fn create_submission(&self, new: NewSubmission) -> StoreResult<Submission> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            INSERT INTO submissions (id, assignment_id, student_id, text_content, file_url, file_name, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.assignment_id)
        .bind(new.student_id)
        .bind(&new.text_content)
        .bind(&new.file_url)
        .bind(&new.file_name)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::DuplicateSubmission {
                    assignment_id: new.assignment_id,
                    student_id: new.student_id,
                }
            }
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                StoreError::UnknownAssignment(new.assignment_id)
            }
            other => StoreError::Database(other),
        })?;

        Submission::try_from(row)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation() -> Evaluation {
        Evaluation {
            plagiarism_risk: 0.0,
            score: 10.0,
            feedback_summary: String::new(),
            details: serde_json::json!({}),
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn terminal_write_requires_result_iff_evaluated() {
        let e = evaluation();
        assert!(check_terminal_write(Some(&e), SubmissionStatus::Evaluated).is_ok());
        assert!(check_terminal_write(None, SubmissionStatus::Failed).is_ok());
        assert!(check_terminal_write(None, SubmissionStatus::Evaluated).is_err());
        assert!(check_terminal_write(Some(&e), SubmissionStatus::Failed).is_err());
        assert!(check_terminal_write(None, SubmissionStatus::Pending).is_err());
        assert!(check_terminal_write(None, SubmissionStatus::Evaluating).is_err());
    }

    #[test]
    fn release_only_restores_evaluation_sources() {
        assert!(check_release(SubmissionStatus::Pending).is_ok());
        assert!(check_release(SubmissionStatus::Failed).is_ok());
        assert!(check_release(SubmissionStatus::Evaluating).is_err());
        assert!(check_release(SubmissionStatus::Evaluated).is_err());
    }
}
