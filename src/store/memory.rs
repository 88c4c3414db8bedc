//! In-process submission store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Problem, Submission, SubmissionStore};
use crate::core::{StoreError, SubmissionStatus, Verdict};

#[derive(Debug, Default)]
struct Inner {
    submissions: HashMap<i64, Submission>,
    problems: HashMap<i64, Problem>,
}

/// Store backed by in-memory maps.
///
/// A commit updates status, time and message under one write lock, so a
/// reader never sees a half-written record. A second terminal commit for
/// the same submission is refused.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_problem(&self, problem: Problem) {
        self.inner.write().await.problems.insert(problem.id, problem);
    }

    pub async fn insert_submission(&self, submission: Submission) {
        self.inner
            .write()
            .await
            .submissions
            .insert(submission.id, submission);
    }

    /// Snapshot of a submission record
    pub async fn submission(&self, id: i64) -> Option<Submission> {
        self.inner.read().await.submissions.get(&id).cloned()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get_submission(&self, id: i64) -> Result<Submission, StoreError> {
        self.submission(id)
            .await
            .ok_or(StoreError::SubmissionNotFound(id))
    }

    async fn get_problem(&self, id: i64) -> Result<Problem, StoreError> {
        let mut problem = self
            .inner
            .read()
            .await
            .problems
            .get(&id)
            .cloned()
            .ok_or(StoreError::ProblemNotFound(id))?;
        problem.testcases.sort_by_key(|tc| tc.id);
        Ok(problem)
    }

    async fn commit_verdict(
        &self,
        submission_id: i64,
        verdict: Verdict,
        elapsed_seconds: f64,
        diagnostic: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let submission = inner
            .submissions
            .get_mut(&submission_id)
            .ok_or(StoreError::SubmissionNotFound(submission_id))?;

        if !submission.status.is_pending() {
            return Err(StoreError::AlreadyCommitted(submission_id));
        }

        submission.status = SubmissionStatus::Judged(verdict);
        submission.execution_time = Some(elapsed_seconds);
        submission.error_message = diagnostic.map(str::to_string);
        Ok(())
    }
}
