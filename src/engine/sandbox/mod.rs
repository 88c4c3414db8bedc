//! Execution sandbox
//!
//! Runs one untrusted program once:
//! - writes the source into a private, scoped working directory
//! - compiles it if the language needs a compile step
//! - runs it with the given input under a hard wall-clock bound
//! - captures stdout, stderr and termination status
//!
//! The working directory is removed on every exit path when the
//! [`tempfile::TempDir`] guard drops. The sandbox does NOT compare outputs.

pub mod config;
pub mod process;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tracing::debug;

use crate::core::{SandboxError, Verdict};
use crate::languages::LanguageProfile;

pub use config::SandboxConfig;
pub use process::{run_process, ProcessOutput, ProcessSpec, ProcessStatus};

/// Upper bound on diagnostic text attached to a verdict
pub const MAX_DIAGNOSTIC_CHARS: usize = 4096;

/// Result of one sandbox run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// `Accepted` here is provisional: output has not been compared yet
    pub verdict: Verdict,
    pub stdout: String,
    pub stderr: String,
    /// Status of the last process run (the compiler on compile failure)
    pub status: ProcessStatus,
    /// Wall time of the run step; the limit itself on timeout, zero if
    /// the run step never happened
    pub elapsed: Duration,
    /// Display-safe message for non-accepted verdicts
    pub diagnostic: Option<String>,
}

/// Runs a program once. Implemented by [`Sandbox`]; a seam for tests.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        source_code: &str,
        profile: &LanguageProfile,
        stdin: &str,
        time_limit: Duration,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// Process-based sandbox with scoped working directories
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn work_dir(&self) -> Result<tempfile::TempDir, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("judge-");
        match &self.config.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(SandboxError::WorkDir)
    }

    async fn compile(
        &self,
        compile_cmd: &[String],
        work_dir: &Path,
    ) -> Result<Option<ExecutionResult>, SandboxError> {
        debug!("Compiling with {:?}", compile_cmd);

        let output = run_process(
            ProcessSpec::new(compile_cmd, work_dir)
                .with_time_limit(self.config.compile_time_limit)
                .with_max_output_bytes(self.config.max_output_bytes),
        )
        .await?;

        if output.status.is_success() {
            return Ok(None);
        }

        let message = if !output.stderr.trim().is_empty() {
            format!("Compilation Error:\n{}", output.stderr.trim_end())
        } else if !output.stdout.trim().is_empty() {
            format!("Compilation Error:\n{}", output.stdout.trim_end())
        } else {
            match output.status {
                ProcessStatus::TimedOut => "Compilation timed out".to_string(),
                ProcessStatus::Signaled(_) => "Compiler crashed".to_string(),
                ProcessStatus::Exited(code) => {
                    format!("Compilation failed with exit code {}", code)
                }
            }
        };

        Ok(Some(ExecutionResult {
            verdict: Verdict::CompilationError,
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status,
            elapsed: Duration::ZERO,
            diagnostic: Some(sanitize_diagnostic(&message, work_dir)),
        }))
    }
}

#[async_trait]
impl Executor for Sandbox {
    async fn execute(
        &self,
        source_code: &str,
        profile: &LanguageProfile,
        stdin: &str,
        time_limit: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        let temp_dir = self.work_dir()?;
        let work_dir = temp_dir.path();

        tokio::fs::write(work_dir.join(&profile.source_file), source_code).await?;

        if let Some(compile_cmd) = &profile.compile_command {
            if let Some(failure) = self.compile(compile_cmd, work_dir).await? {
                return Ok(failure);
            }
        }

        let output = run_process(
            ProcessSpec::new(&profile.run_command, work_dir)
                .with_stdin(stdin)
                .with_time_limit(time_limit)
                .with_max_output_bytes(self.config.max_output_bytes),
        )
        .await?;

        let (verdict, diagnostic) = match output.status {
            ProcessStatus::Exited(0) => (Verdict::Accepted, None),
            ProcessStatus::TimedOut => (
                Verdict::TimeLimitExceeded,
                Some(format!(
                    "Time Limit Exceeded (>{}s)",
                    time_limit.as_secs_f64()
                )),
            ),
            ProcessStatus::Exited(code) => (
                Verdict::RuntimeError,
                Some(format!(
                    "Runtime Error\nReturn code: {}\nStderr:\n{}",
                    code,
                    output.stderr.trim()
                )),
            ),
            ProcessStatus::Signaled(sig) => {
                let name = Signal::try_from(sig)
                    .map(|s| s.as_str())
                    .unwrap_or("unknown signal");
                (
                    Verdict::RuntimeError,
                    Some(format!(
                        "Runtime Error\nReturn code: {} (killed by {})\nStderr:\n{}",
                        -sig,
                        name,
                        output.stderr.trim()
                    )),
                )
            }
        };

        debug!(
            "Execution finished: verdict={}, status={:?}, elapsed={:?}",
            verdict, output.status, output.elapsed
        );

        Ok(ExecutionResult {
            verdict,
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status,
            elapsed: output.elapsed,
            diagnostic: diagnostic.map(|d| sanitize_diagnostic(&d, work_dir)),
        })
    }
}

/// Strip the private working directory path and bound the length
pub fn sanitize_diagnostic(text: &str, work_dir: &Path) -> String {
    let dir = work_dir.to_string_lossy();
    if dir.is_empty() {
        return truncate_diagnostic(text.to_string());
    }
    truncate_diagnostic(text.replace(dir.as_ref(), "."))
}

/// Bound diagnostic text to [`MAX_DIAGNOSTIC_CHARS`]
pub fn truncate_diagnostic(text: String) -> String {
    if text.chars().count() > MAX_DIAGNOSTIC_CHARS {
        let mut truncated: String = text.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
        truncated.push_str("\n... (truncated)");
        truncated
    } else {
        text
    }
}
