//! Sandbox configuration

use std::path::PathBuf;
use std::time::Duration;

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock bound for the compile step (default: 30s)
    pub compile_time_limit: Duration,
    /// Maximum bytes captured per output stream (default: 64 MiB)
    pub max_output_bytes: usize,
    /// Parent directory for per-execution working directories
    /// (default: the system temp directory)
    pub work_root: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            compile_time_limit: Duration::from_millis(30_000),
            max_output_bytes: 64 * 1024 * 1024,
            work_root: None,
        }
    }
}
