#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use evalcore::analysis::{
    AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisResult, AnalysisService, ScorePolicy,
};
use evalcore::db::{
    Assignment, CorpusEntry, Evaluation, MemoryStore, NewAssignment, NewSubmission, StatusChange,
    StoreError, StoreResult, Submission, SubmissionStatus, SubmissionStore,
};
use evalcore::evaluation::{Evaluator, EvaluatorSettings};

/// Analysis service double: records every request and answers from a script.
/// Once the script runs out it answers with an empty (all-default) result.
#[derive(Default)]
pub struct ScriptedAnalysis {
    script: Mutex<VecDeque<Result<AnalysisResult, AnalysisError>>>,
    requests: Mutex<Vec<AnalysisRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful answers wait for a permit on `gate` before returning.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Queues an answer given as the service's raw JSON body.
    pub fn respond_json(self, body: serde_json::Value) -> Self {
        let response: AnalysisResponse =
            serde_json::from_value(body).expect("scripted body must parse");
        self.script.lock().unwrap().push_back(Ok(response.normalize()));
        self
    }

    pub fn fail_with(self, error: AnalysisError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysis {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let answer = next.unwrap_or_else(|| Ok(AnalysisResponse::default().normalize()));

        if answer.is_ok() {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
        }
        answer
    }
}

pub fn upstream_500() -> AnalysisError {
    AnalysisError::Status {
        status: 500,
        body: "model crashed".to_string(),
    }
}

pub fn upstream_timeout() -> AnalysisError {
    AnalysisError::Timeout(Duration::from_secs(30))
}

pub fn settings(policy: ScorePolicy) -> EvaluatorSettings {
    EvaluatorSettings {
        stale_after: Duration::from_secs(60),
        score_policy: policy,
    }
}

pub fn evaluator(
    store: Arc<dyn SubmissionStore>,
    analysis: Arc<dyn AnalysisService>,
) -> Evaluator {
    Evaluator::new(store, analysis, settings(ScorePolicy::PassThrough))
}

pub async fn assignment(
    store: &dyn SubmissionStore,
    keywords: &[&str],
    max_score: f64,
) -> Assignment {
    store
        .create_assignment(NewAssignment {
            title: "Ownership essay".to_string(),
            description: "Explain borrowing".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            max_score,
        })
        .await
        .unwrap()
}

pub async fn submit(store: &dyn SubmissionStore, assignment: &Assignment, text: &str) -> Submission {
    store
        .create_submission(NewSubmission {
            assignment_id: assignment.id,
            student_id: Uuid::new_v4(),
            text_content: text.to_string(),
            file_url: None,
            file_name: None,
        })
        .await
        .unwrap()
}

pub async fn status_of(store: &dyn SubmissionStore, id: Uuid) -> SubmissionStatus {
    store.get_submission(id).await.unwrap().unwrap().status
}

pub async fn force_evaluating(store: &dyn SubmissionStore, id: Uuid) -> i64 {
    store
        .conditional_set_status(id, SubmissionStatus::EVALUATION_SOURCES, SubmissionStatus::Evaluating)
        .await
        .unwrap()
        .expect("submission should be able to enter evaluating")
        .attempt
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

/// Memory store with switchable faults, for the failure paths a healthy
/// store never takes.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// Corpus listing fails.
    pub fail_corpus: AtomicBool,
    /// Terminal writes fail.
    pub fail_terminal_write: AtomicBool,
    /// Assignments read as missing.
    pub hide_assignments: AtomicBool,
    /// The next transition into `Evaluating` is preceded by a complete,
    /// failed attempt from another caller.
    pub interleave_failed_attempt: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_corpus(self) -> Self {
        self.fail_corpus.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_terminal_write(self) -> Self {
        self.fail_terminal_write.store(true, Ordering::SeqCst);
        self
    }

    pub fn hiding_assignments(self) -> Self {
        self.hide_assignments.store(true, Ordering::SeqCst);
        self
    }

    pub fn interleaving_failed_attempt(self) -> Self {
        self.interleave_failed_attempt.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl SubmissionStore for FaultyStore {
    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        self.inner.get_submission(id).await
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        if self.hide_assignments.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get_assignment(id).await
    }

    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        self.inner.list_assignments().await
    }

    async fn list_submissions(&self, assignment_id: Option<Uuid>) -> StoreResult<Vec<Submission>> {
        self.inner.list_submissions(assignment_id).await
    }

    async fn list_by_assignment(
        &self,
        assignment_id: Uuid,
        exclude_id: Uuid,
        non_empty_text_only: bool,
    ) -> StoreResult<Vec<CorpusEntry>> {
        if self.fail_corpus.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner
            .list_by_assignment(assignment_id, exclude_id, non_empty_text_only)
            .await
    }

    async fn conditional_set_status(
        &self,
        id: Uuid,
        expected: &[SubmissionStatus],
        new_status: SubmissionStatus,
    ) -> StoreResult<Option<StatusChange>> {
        if new_status == SubmissionStatus::Evaluating
            && self.interleave_failed_attempt.swap(false, Ordering::SeqCst)
        {
            let attempt = force_evaluating(&self.inner, id).await;
            self.inner
                .set_evaluation_result(id, attempt, None, SubmissionStatus::Failed)
                .await?;
        }
        self.inner.conditional_set_status(id, expected, new_status).await
    }

    async fn reclaim_stale(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        self.inner.reclaim_stale(id, stale_before).await
    }

    async fn set_evaluation_result(
        &self,
        id: Uuid,
        attempt: i64,
        evaluation: Option<&Evaluation>,
        new_status: SubmissionStatus,
    ) -> StoreResult<bool> {
        if self.fail_terminal_write.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner
            .set_evaluation_result(id, attempt, evaluation, new_status)
            .await
    }

    async fn release_evaluation(
        &self,
        id: Uuid,
        attempt: i64,
        restore: SubmissionStatus,
    ) -> StoreResult<bool> {
        self.inner.release_evaluation(id, attempt, restore).await
    }

    async fn create_assignment(&self, new: NewAssignment) -> StoreResult<Assignment> {
        self.inner.create_assignment(new).await
    }

    async fn create_submission(&self, new: NewSubmission) -> StoreResult<Submission> {
        self.inner.create_submission(new).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn close(&self) {}
}
