//! Error taxonomy
//!
//! Candidate-caused outcomes are never errors: they are [`Verdict`] values.
//! Everything here is either a configuration problem, a broken judging
//! pipeline, or scheduler backpressure.
//!
//! [`Verdict`]: crate::core::verdict::Verdict

use thiserror::Error;

use crate::core::verdict::Verdict;

/// Language identifier with no registered profile.
///
/// Judged as a compilation error for the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Failure of the sandbox machinery itself (not of the candidate program).
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare working directory: {0}")]
    WorkDir(#[source] std::io::Error),

    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a submission store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("submission {0} not found")]
    SubmissionNotFound(i64),

    #[error("problem {0} not found")]
    ProblemNotFound(i64),

    #[error("submission {0} already has a terminal status")]
    AlreadyCommitted(i64),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error returned by the orchestrator and the scheduler.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("submission {0} not found")]
    SubmissionNotFound(i64),

    #[error("problem {problem_id} of submission {submission_id} not found")]
    ProblemNotFound { submission_id: i64, problem_id: i64 },

    #[error("submission store failure: {0}")]
    Store(#[from] StoreError),

    #[error("sandbox failure: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("submission {submission_id} is already judged ({verdict})")]
    AlreadyJudged { submission_id: i64, verdict: Verdict },

    #[error("submission {0} is already queued or being judged")]
    AlreadyInProgress(i64),

    #[error("judge queue is full, submission {0} rejected")]
    QueueFull(i64),

    #[error("judge scheduler is shut down")]
    SchedulerClosed,
}

impl JudgeError {
    /// True when the judging pipeline failed, as opposed to the candidate
    /// code or the scheduler. The submission stays retryable.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            JudgeError::SubmissionNotFound(_)
                | JudgeError::ProblemNotFound { .. }
                | JudgeError::Store(_)
                | JudgeError::Sandbox(_)
        )
    }
}
