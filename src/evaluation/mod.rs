//! Evaluation orchestrator.
//!
//! `trigger_evaluation` is the only code path that writes a submission's
//! `status` and `evaluation`. Entry into `Evaluating` is a compare-and-set on
//! the store, which is what keeps at most one analysis call in flight per
//! submission no matter how many triggers race. Every later write of the
//! attempt is fenced on the attempt number that compare-and-set handed out.

mod corpus;
mod error;

pub use corpus::assemble_corpus;
pub use error::EvaluationError;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisRequest, AnalysisService, ScorePolicy};
use crate::db::{Evaluation, StoreError, SubmissionStatus, SubmissionStore};

#[derive(Debug, Clone, Copy)]
pub struct EvaluatorSettings {
    /// How long a submission may sit in `Evaluating` before a new trigger is
    /// allowed to take it over.
    pub stale_after: Duration,
    pub score_policy: ScorePolicy,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(60),
            score_policy: ScorePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutcome {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub evaluation: Evaluation,
    /// True when a stored evaluation was returned without calling the service.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationView {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub evaluation: Option<Evaluation>,
}

/// Ownership of one evaluation attempt.
#[derive(Debug, Clone, Copy)]
struct Lease {
    attempt: i64,
    /// Status to put back if the attempt is abandoned before the analysis call.
    previous: SubmissionStatus,
}

pub struct Evaluator {
    store: Arc<dyn SubmissionStore>,
    analysis: Arc<dyn AnalysisService>,
    settings: EvaluatorSettings,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        analysis: Arc<dyn AnalysisService>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            store,
            analysis,
            settings,
        }
    }

    pub async fn trigger_evaluation(
        &self,
        submission_id: Uuid,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        let submission = self
            .store
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| EvaluationError::submission_not_found(submission_id))?;
        let assignment = self
            .store
            .get_assignment(submission.assignment_id)
            .await?
            .ok_or_else(|| EvaluationError::assignment_not_found(submission.assignment_id))?;

        if submission.status == SubmissionStatus::Evaluated {
            let evaluation = submission.evaluation.clone().ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "submission {} is evaluated without a result",
                    submission_id
                ))
            })?;
            info!(%submission_id, "Submission already evaluated, returning stored result");
            return Ok(EvaluationOutcome {
                submission_id,
                status: SubmissionStatus::Evaluated,
                evaluation,
                reused: true,
            });
        }

        let lease = self.acquire(submission_id).await?;

        let corpus =
            match assemble_corpus(self.store.as_ref(), assignment.id, submission_id).await {
                Ok(corpus) => corpus,
                Err(e) => {
                    error!(%submission_id, error = %e, "Failed to assemble corpus");
                    self.release(submission_id, lease).await;
                    return Err(e.into());
                }
            };

        info!(
            %submission_id,
            assignment_id = %assignment.id,
            attempt = lease.attempt,
            corpus_size = corpus.len(),
            "Evaluating submission"
        );

        let request = AnalysisRequest {
            submission_id: submission_id.to_string(),
            text: submission.text_content.clone(),
            corpus,
            keywords: assignment.keywords.clone(),
            max_score: assignment.max_score,
        };

        match self.analysis.analyze(&request).await {
            Ok(result) => {
                let evaluation = Evaluation {
                    plagiarism_risk: result.plagiarism_risk,
                    score: self
                        .settings
                        .score_policy
                        .apply(result.score, assignment.max_score),
                    feedback_summary: result.feedback_summary,
                    details: result.details,
                    evaluated_at: Utc::now(),
                };
                self.finish(submission_id, lease, Some(&evaluation), SubmissionStatus::Evaluated)
                    .await?;

                info!(
                    %submission_id,
                    score = evaluation.score,
                    plagiarism_risk = evaluation.plagiarism_risk,
                    "Submission evaluated"
                );
                Ok(EvaluationOutcome {
                    submission_id,
                    status: SubmissionStatus::Evaluated,
                    evaluation,
                    reused: false,
                })
            }
            Err(e) => {
                error!(%submission_id, error = %e, "Analysis failed");
                self.finish(submission_id, lease, None, SubmissionStatus::Failed)
                    .await?;
                Err(e.into())
            }
        }
    }

    pub async fn get_evaluation(
        &self,
        submission_id: Uuid,
    ) -> Result<EvaluationView, EvaluationError> {
        let submission = self
            .store
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| EvaluationError::submission_not_found(submission_id))?;

        Ok(EvaluationView {
            submission_id,
            status: submission.status,
            evaluation: submission.evaluation,
        })
    }

    /// Moves the submission into `Evaluating`, or takes over an attempt that
    /// has been there longer than `stale_after`.
    async fn acquire(&self, id: Uuid) -> Result<Lease, EvaluationError> {
        let change = self
            .store
            .conditional_set_status(
                id,
                SubmissionStatus::EVALUATION_SOURCES,
                SubmissionStatus::Evaluating,
            )
            .await?;
        if let Some(change) = change {
            return Ok(Lease {
                attempt: change.attempt,
                previous: change.previous,
            });
        }

        let cutoff = chrono::Duration::from_std(self.settings.stale_after)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        if let Some(cutoff) = cutoff {
            if let Some(attempt) = self.store.reclaim_stale(id, cutoff).await? {
                warn!(submission_id = %id, attempt, "Reclaimed stale evaluation");
                return Ok(Lease {
                    attempt,
                    previous: SubmissionStatus::Failed,
                });
            }
        }

        warn!(submission_id = %id, "Evaluation already in progress or finished");
        Err(EvaluationError::Conflict(id))
    }

    async fn release(&self, id: Uuid, lease: Lease) {
        match self
            .store
            .release_evaluation(id, lease.attempt, lease.previous)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                submission_id = %id,
                attempt = lease.attempt,
                "Evaluation lock was taken over before release"
            ),
            Err(e) => error!(
                submission_id = %id,
                error = %e,
                "Failed to release evaluation lock, submission stays evaluating until stale"
            ),
        }
    }

    async fn finish(
        &self,
        id: Uuid,
        lease: Lease,
        evaluation: Option<&Evaluation>,
        status: SubmissionStatus,
    ) -> Result<(), EvaluationError> {
        match self
            .store
            .set_evaluation_result(id, lease.attempt, evaluation, status)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    submission_id = %id,
                    attempt = lease.attempt,
                    %status,
                    "Evaluation was taken over, discarding result"
                );
                Err(EvaluationError::Conflict(id))
            }
            Err(e) => {
                error!(
                    submission_id = %id,
                    error = %e,
                    "Failed to record evaluation result, submission stays evaluating until stale"
                );
                Err(e.into())
            }
        }
    }
}
