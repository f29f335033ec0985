use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    check_release, check_terminal_write, Assignment, CorpusEntry, Evaluation, NewAssignment,
    NewSubmission, StatusChange, StoreError, StoreResult, Submission, SubmissionStatus,
    SubmissionStore,
};

#[derive(Default)]
struct Inner {
    assignments: HashMap<Uuid, Assignment>,
    submissions: HashMap<Uuid, Submission>,
    /// Ids in insertion order.
    assignment_order: Vec<Uuid>,
    submission_order: Vec<Uuid>,
}

impl Inner {
    /// The submission if it is `Evaluating` under `attempt`.
    fn owned_attempt(&mut self, id: Uuid, attempt: i64) -> Option<&mut Submission> {
        self.submissions
            .get_mut(&id)
            .filter(|s| s.status == SubmissionStatus::Evaluating && s.attempt == attempt)
    }
}

/// In-process store used by tests and local runs without PostgreSQL.
///
/// A single mutex guards all records, which makes each conditional update a
/// check-and-write under one lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        Ok(self.lock().submissions.get(&id).cloned())
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.lock().assignments.get(&id).cloned())
    }

    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        let inner = self.lock();
        let assignments = inner
            .assignment_order
            .iter()
            .rev()
            .filter_map(|id| inner.assignments.get(id).cloned())
            .collect();
        Ok(assignments)
    }

    async fn list_submissions(&self, assignment_id: Option<Uuid>) -> StoreResult<Vec<Submission>> {
        let inner = self.lock();
        let submissions = inner
            .submission_order
            .iter()
            .rev()
            .filter_map(|id| inner.submissions.get(id))
            .filter(|s| assignment_id.map_or(true, |wanted| s.assignment_id == wanted))
            .cloned()
            .collect();
        Ok(submissions)
    }

    async fn list_by_assignment(
        &self,
        assignment_id: Uuid,
        exclude_id: Uuid,
        non_empty_text_only: bool,
    ) -> StoreResult<Vec<CorpusEntry>> {
        let inner = self.lock();
        let entries = inner
            .submission_order
            .iter()
            .filter_map(|id| inner.submissions.get(id))
            .filter(|s| s.assignment_id == assignment_id && s.id != exclude_id)
            .filter(|s| !non_empty_text_only || !s.text_content.is_empty())
            .map(|s| CorpusEntry {
                id: s.id,
                text: s.text_content.clone(),
            })
            .collect();
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

        let mut inner = self.lock();
        let Some(submission) = inner.submissions.get_mut(&id) else {
            return Ok(None);
        };
        if submission.status == SubmissionStatus::Evaluated || !expected.contains(&submission.status)
        {
            return Ok(None);
        }

        let previous = submission.status;
        submission.status = new_status;
        submission.status_changed_at = Utc::now();
        if new_status == SubmissionStatus::Evaluating {
            submission.attempt += 1;
        }
        Ok(Some(StatusChange {
            previous,
            attempt: submission.attempt,
        }))
    }

    async fn reclaim_stale(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        let mut inner = self.lock();
        match inner.submissions.get_mut(&id) {
            Some(submission)
                if submission.status == SubmissionStatus::Evaluating
                    && submission.status_changed_at < stale_before =>
            {
                submission.status_changed_at = Utc::now();
                submission.attempt += 1;
                Ok(Some(submission.attempt))
            }
            _ => Ok(None),
        }
    }

    async fn set_evaluation_result(
        &self,
        id: Uuid,
        attempt: i64,
        evaluation: Option<&Evaluation>,
        new_status: SubmissionStatus,
    ) -> StoreResult<bool> {
        check_terminal_write(evaluation, new_status)?;

        let mut inner = self.lock();
        let Some(submission) = inner.owned_attempt(id, attempt) else {
            return Ok(false);
        };
        submission.status = new_status;
        submission.evaluation = evaluation.cloned();
        submission.status_changed_at = Utc::now();
        Ok(true)
    }

    async fn release_evaluation(
        &self,
        id: Uuid,
        attempt: i64,
        restore: SubmissionStatus,
    ) -> StoreResult<bool> {
        check_release(restore)?;

        let mut inner = self.lock();
        let Some(submission) = inner.owned_attempt(id, attempt) else {
            return Ok(false);
        };
        submission.status = restore;
        submission.status_changed_at = Utc::now();
        Ok(true)
    }

    async fn create_assignment(&self, new: NewAssignment) -> StoreResult<Assignment> {
        let assignment = Assignment {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            keywords: new.keywords,
            max_score: new.max_score,
            created_at: Utc::now(),
        };
        let mut inner = self.lock();
        inner.assignment_order.push(assignment.id);
        inner.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn create_submission(&self, new: NewSubmission) -> StoreResult<Submission> {
        let mut inner = self.lock();
        if !inner.assignments.contains_key(&new.assignment_id) {
            return Err(StoreError::UnknownAssignment(new.assignment_id));
        }
        let duplicate = inner
            .submissions
            .values()
            .any(|s| s.assignment_id == new.assignment_id && s.student_id == new.student_id);
        if duplicate {
            return Err(StoreError::DuplicateSubmission {
                assignment_id: new.assignment_id,
                student_id: new.student_id,
            });
        }

        let now = Utc::now();
        let submission = Submission {
            id: Uuid::new_v4(),
            assignment_id: new.assignment_id,
            student_id: new.student_id,
            text_content: new.text_content,
            file_url: new.file_url,
            file_name: new.file_name,
            status: SubmissionStatus::Pending,
            evaluation: None,
            attempt: 0,
            status_changed_at: now,
            submitted_at: now,
        };
        inner.submission_order.push(submission.id);
        inner.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) {}
}
