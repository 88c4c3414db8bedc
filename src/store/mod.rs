//! Submission store interface
//!
//! Submissions and problems are owned by the surrounding system; the judge
//! reads them and writes back one terminal verdict per submission.

pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{StoreError, SubmissionStatus, Verdict};

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Smallest effective per-case time limit
pub const MIN_TIME_LIMIT: Duration = Duration::from_secs(1);

/// A candidate program submitted for a problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub problem_id: i64,
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub status: SubmissionStatus,
    /// Worst single test case wall time, in seconds
    #[serde(default)]
    pub execution_time: Option<f64>,
    /// Compile error / runtime error / wrong answer details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Submission {
    /// A fresh `Pending` submission
    pub fn new(
        id: i64,
        problem_id: i64,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            problem_id,
            code: code.into(),
            language: language.into(),
            status: SubmissionStatus::Pending,
            execution_time: None,
            error_message: None,
        }
    }
}

/// A problem and its ordered test cases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    pub time_limit_ms: u32,
    #[serde(default)]
    pub testcases: Vec<TestCase>,
}

impl Problem {
    /// Per-case wall-clock limit, never below [`MIN_TIME_LIMIT`]
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(u64::from(self.time_limit_ms)).max(MIN_TIME_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_sample: bool,
}

impl TestCase {
    pub fn new(id: i64, input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            id,
            input: input.into(),
            expected_output: expected_output.into(),
            is_sample: false,
        }
    }
}

/// Source of submissions and problems, sink for verdicts
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: i64) -> Result<Submission, StoreError>;

    /// Test cases are returned in ascending id order
    async fn get_problem(&self, id: i64) -> Result<Problem, StoreError>;

    /// Write the terminal status. Readers observe either the old record or
    /// the complete new one.
    async fn commit_verdict(
        &self,
        submission_id: i64,
        verdict: Verdict,
        elapsed_seconds: f64,
        diagnostic: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Queue of submission ids waiting to be judged
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    /// Wait up to `timeout` for the next id. Once this returns an id, the
    /// queue no longer holds it.
    async fn pop_submission_id(&self, timeout: Duration) -> Option<i64>;

    /// Put an id back at the tail of the queue
    async fn push_submission_id(&self, id: i64) -> Result<(), StoreError>;
}
