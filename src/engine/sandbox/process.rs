//! Child process execution with a hard wall-clock bound
//!
//! Every child is started as the leader of a fresh process group so that a
//! timeout can take down the whole tree, not only the direct child.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::SandboxError;

const BUFFER_SIZE: usize = 8192;

/// How long to wait for output pipes to drain after the process group is gone.
/// A grandchild that escaped the group may keep a pipe open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Raw termination status, no verdict interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Exited normally with the given exit code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
    /// Wall-clock bound exceeded; the process group was killed
    TimedOut,
}

impl ProcessStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessStatus::Exited(0))
    }

    /// Exit code in the usual shell convention (negative signal number when signaled)
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Exited(code) => Some(*code),
            ProcessStatus::Signaled(sig) => Some(-sig),
            ProcessStatus::TimedOut => None,
        }
    }
}

impl From<ExitStatus> for ProcessStatus {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessStatus::Exited(code),
            (None, Some(sig)) => ProcessStatus::Signaled(sig),
            (None, None) => ProcessStatus::Exited(-1),
        }
    }
}

/// Outcome of one child process run
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    /// Wall time; equals the limit when timed out
    pub elapsed: Duration,
}

/// What to run and under which bounds
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    pub command: &'a [String],
    pub work_dir: &'a Path,
    pub stdin: Option<&'a str>,
    pub time_limit: Duration,
    pub max_output_bytes: usize,
}

impl<'a> ProcessSpec<'a> {
    pub fn new(command: &'a [String], work_dir: &'a Path) -> Self {
        Self {
            command,
            work_dir,
            stdin: None,
            time_limit: Duration::from_secs(1),
            max_output_bytes: 64 * 1024 * 1024,
        }
    }

    pub fn with_stdin(mut self, stdin: &'a str) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }
}

/// Kills the child's process group when dropped
struct ProcessGroup(Option<Pid>);

impl ProcessGroup {
    /// Signal the group once. Later calls are no-ops, so a recycled pgid
    /// is never targeted.
    fn kill(&mut self) {
        let Some(pgid) = self.0.take() else {
            return;
        };
        // The group id stays valid while any member is alive
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run a command to completion or until its time limit, capturing output
pub async fn run_process(spec: ProcessSpec<'_>) -> Result<ProcessOutput, SandboxError> {
    let (program, args) = spec
        .command
        .split_first()
        .ok_or(SandboxError::EmptyCommand)?;

    debug!(
        "Running {:?} in {:?} (limit {:?})",
        spec.command, spec.work_dir, spec.time_limit
    );

    let mut cmd = Command::new(resolve_program(program, spec.work_dir));
    cmd.args(args)
        .current_dir(spec.work_dir)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
        program: program.clone(),
        source,
    })?;
    let mut group = ProcessGroup(child.id().map(|pid| Pid::from_raw(pid as i32)));

    if let (Some(mut pipe), Some(input)) = (child.stdin.take(), spec.stdin) {
        let input = input.to_owned();
        tokio::spawn(async move {
            // The program may exit without reading its input
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                debug!("Stdin not fully consumed: {}", e);
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, spec.max_output_bytes)));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, spec.max_output_bytes)));

    let (status, elapsed) = match tokio::time::timeout(spec.time_limit, child.wait()).await {
        Ok(status) => {
            let elapsed = started.elapsed();
            let status = status?;
            group.kill();
            (ProcessStatus::from(status), elapsed)
        }
        Err(_) => {
            debug!("Time limit {:?} exceeded, killing process group", spec.time_limit);
            group.kill();
            child.wait().await?;
            (ProcessStatus::TimedOut, spec.time_limit)
        }
    };

    Ok(ProcessOutput {
        status,
        stdout: collect(stdout).await?,
        stderr: collect(stderr).await?,
        elapsed,
    })
}

/// Relative paths such as `./solution` refer to the working directory
fn resolve_program(program: &str, work_dir: &Path) -> PathBuf {
    let path = Path::new(program);
    if program.contains('/') && path.is_relative() {
        work_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Read a pipe to EOF, keeping at most `limit` bytes and discarding the rest
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.len());
        captured.extend_from_slice(&buffer[..n.min(room)]);
    }
    Ok(captured)
}

async fn collect(
    reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
) -> Result<String, SandboxError> {
    let Some(mut handle) = reader else {
        return Ok(String::new());
    };

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(bytes)) => Ok(String::from_utf8_lossy(&bytes?).into_owned()),
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            Ok(String::new())
        }
        Err(_) => {
            warn!("Output pipe still open after process exit, dropping it");
            handle.abort();
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh("echo out; echo err >&2; exit 3");
        let output = run_process(ProcessSpec::new(&cmd, dir.path())).await.unwrap();

        assert_eq!(output.status, ProcessStatus::Exited(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh("read a b; echo $((a + b))");
        let output = run_process(ProcessSpec::new(&cmd, dir.path()).with_stdin("3 4\n"))
            .await
            .unwrap();

        assert!(output.status.is_success());
        assert_eq!(output.stdout.trim(), "7");
    }

    #[tokio::test]
    async fn test_timeout_reports_limit() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh("sleep 5");
        let limit = Duration::from_millis(300);
        let started = Instant::now();
        let output = run_process(ProcessSpec::new(&cmd, dir.path()).with_time_limit(limit))
            .await
            .unwrap();

        assert_eq!(output.status, ProcessStatus::TimedOut);
        assert_eq!(output.elapsed, limit);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_tree() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survivor");
        // The background child would create the marker if it outlived the kill
        let script = format!("(sleep 1; touch {}) & sleep 5", marker.display());
        let cmd = sh(&script);
        let output = run_process(
            ProcessSpec::new(&cmd, dir.path()).with_time_limit(Duration::from_millis(200)),
        )
        .await
        .unwrap();
        assert_eq!(output.status, ProcessStatus::TimedOut);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_group_is_signalled_once() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 5"])
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut group = ProcessGroup(child.id().map(|pid| Pid::from_raw(pid as i32)));

        group.kill();
        assert!(group.0.is_none());
        let status = child.wait().await.unwrap();
        assert_eq!(ProcessStatus::from(status), ProcessStatus::Signaled(9));

        // Nothing left to signal on the second call or on drop
        group.kill();
        assert!(group.0.is_none());
    }

    #[tokio::test]
    async fn test_signal_status() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh("kill -SEGV $$");
        let output = run_process(ProcessSpec::new(&cmd, dir.path())).await.unwrap();

        assert_eq!(output.status, ProcessStatus::Signaled(11));
        assert_eq!(output.status.exit_code(), Some(-11));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh("printf 'abcdefghij'");
        let output = run_process(ProcessSpec::new(&cmd, dir.path()).with_max_output_bytes(4))
            .await
            .unwrap();

        assert_eq!(output.stdout, "abcd");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = vec!["./does-not-exist".to_string()];
        let err = run_process(ProcessSpec::new(&cmd, dir.path())).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_process(ProcessSpec::new(&[], dir.path())).await.unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCommand));
    }
}
