//! Test-case evaluator
//!
//! Runs a submission against one test case and turns the sandbox result
//! into a per-case verdict.

use std::sync::Arc;
use std::time::Duration;

use crate::core::{SandboxError, Verdict};
use crate::engine::comparator;
use crate::engine::sandbox::{truncate_diagnostic, Executor};
use crate::languages::LanguageProfile;
use crate::store::{Submission, TestCase};

/// Verdict of a single test case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub verdict: Verdict,
    pub diagnostic: Option<String>,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct Evaluator {
    executor: Arc<dyn Executor>,
}

impl Evaluator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    pub async fn evaluate(
        &self,
        submission: &Submission,
        profile: &LanguageProfile,
        test_case: &TestCase,
        time_limit: Duration,
    ) -> Result<CaseOutcome, SandboxError> {
        let result = self
            .executor
            .execute(&submission.code, profile, &test_case.input, time_limit)
            .await?;

        if !result.verdict.is_accepted() {
            return Ok(CaseOutcome {
                verdict: result.verdict,
                diagnostic: result.diagnostic,
                elapsed: result.elapsed,
            });
        }

        if comparator::matches(&result.stdout, &test_case.expected_output) {
            return Ok(CaseOutcome {
                verdict: Verdict::Accepted,
                diagnostic: None,
                elapsed: result.elapsed,
            });
        }

        let diagnostic = format!(
            "Output doesn't match expected result\nExpected: {}\nGot: {}",
            comparator::normalize(&test_case.expected_output),
            comparator::normalize(&result.stdout)
        );
        Ok(CaseOutcome {
            verdict: Verdict::WrongAnswer,
            diagnostic: Some(truncate_diagnostic(diagnostic)),
            elapsed: result.elapsed,
        })
    }
}
