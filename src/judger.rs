//! Judger module for processing submission judge jobs
//!
//! Drives one judging pass: loads the submission and its problem, evaluates
//! test cases in ascending id order, stops at the first failure, and commits
//! the terminal verdict exactly once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{JudgeError, SandboxError, StoreError, Verdict};
use crate::engine::{Evaluator, Executor};
use crate::languages::LanguageRegistry;
use crate::store::{Problem, Submission, SubmissionStore, TestCase};

/// Per-case line of a judge report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestcaseResult {
    pub testcase_id: i64,
    pub verdict: Verdict,
    pub elapsed: Duration,
}

/// Result of judging a submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeReport {
    pub submission_id: i64,
    pub verdict: Verdict,
    /// Worst single test case, not the sum
    pub elapsed: Duration,
    /// Compile error / Runtime error / Wrong answer message
    pub diagnostic: Option<String>,
    /// Evaluated cases only; cases after the first failure are absent
    pub testcase_results: Vec<TestcaseResult>,
}

impl JudgeReport {
    fn accepted(submission_id: i64) -> Self {
        Self {
            submission_id,
            verdict: Verdict::Accepted,
            elapsed: Duration::ZERO,
            diagnostic: None,
            testcase_results: Vec::new(),
        }
    }
}

/// The judge orchestrator
pub struct Judger {
    store: Arc<dyn SubmissionStore>,
    languages: Arc<LanguageRegistry>,
    evaluator: Evaluator,
}

impl Judger {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        languages: Arc<LanguageRegistry>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            store,
            languages,
            evaluator: Evaluator::new(executor),
        }
    }

    /// Current terminal verdict of a submission, if any
    pub async fn final_verdict(&self, submission_id: i64) -> Result<Option<Verdict>, JudgeError> {
        let submission = self.load_submission(submission_id).await?;
        Ok(submission.status.verdict())
    }

    /// Judge a pending submission and commit its verdict.
    ///
    /// Infrastructure failures leave the submission untouched (still pending).
    pub async fn judge(&self, submission_id: i64) -> Result<JudgeReport, JudgeError> {
        let submission = self.load_submission(submission_id).await?;
        if let Some(verdict) = submission.status.verdict() {
            return Err(JudgeError::AlreadyJudged {
                submission_id,
                verdict,
            });
        }

        let problem = self
            .store
            .get_problem(submission.problem_id)
            .await
            .map_err(|e| match e {
                StoreError::ProblemNotFound(problem_id) => JudgeError::ProblemNotFound {
                    submission_id,
                    problem_id,
                },
                other => JudgeError::Store(other),
            })?;

        info!(
            "Judging submission_id={}, problem_id={}, language={}, testcases={}",
            submission.id,
            problem.id,
            submission.language,
            problem.testcases.len()
        );

        let report = self.run_testcases(&submission, &problem).await?;

        info!(
            "Job summary: submission_id={}, verdict={}, max_time={:.3}s, evaluated={}/{}",
            report.submission_id,
            report.verdict,
            report.elapsed.as_secs_f64(),
            report.testcase_results.len(),
            problem.testcases.len()
        );

        self.store
            .commit_verdict(
                submission_id,
                report.verdict,
                report.elapsed.as_secs_f64(),
                report.diagnostic.as_deref(),
            )
            .await?;

        Ok(report)
    }

    async fn load_submission(&self, submission_id: i64) -> Result<Submission, JudgeError> {
        self.store
            .get_submission(submission_id)
            .await
            .map_err(|e| match e {
                StoreError::SubmissionNotFound(id) => JudgeError::SubmissionNotFound(id),
                other => JudgeError::Store(other),
            })
    }

    async fn run_testcases(
        &self,
        submission: &Submission,
        problem: &Problem,
    ) -> Result<JudgeReport, SandboxError> {
        let mut report = JudgeReport::accepted(submission.id);

        if problem.testcases.is_empty() {
            warn!(
                "Problem {} has no testcases; submission {} accepted without running",
                problem.id, submission.id
            );
            return Ok(report);
        }

        let profile = match self.languages.get(&submission.language) {
            Ok(profile) => profile,
            Err(e) => {
                report.verdict = Verdict::CompilationError;
                report.diagnostic = Some(e.to_string());
                return Ok(report);
            }
        };

        let mut testcases: Vec<&TestCase> = problem.testcases.iter().collect();
        testcases.sort_by_key(|tc| tc.id);

        let time_limit = profile.time_limit_for(problem.time_limit());

        for tc in testcases {
            let outcome = self
                .evaluator
                .evaluate(submission, profile, tc, time_limit)
                .await?;

            debug!(
                "submission_id={}, testcase_id={}, verdict={}, elapsed={:?}",
                submission.id, tc.id, outcome.verdict, outcome.elapsed
            );

            report.elapsed = report.elapsed.max(outcome.elapsed);
            report.testcase_results.push(TestcaseResult {
                testcase_id: tc.id,
                verdict: outcome.verdict,
                elapsed: outcome.elapsed,
            });

            if !outcome.verdict.is_accepted() {
                report.verdict = outcome.verdict;
                report.diagnostic = outcome.diagnostic;
                break;
            }
        }

        Ok(report)
    }
}
