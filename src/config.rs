//! Worker configuration
//!
//! Read once at start-up from environment variables (after `.env` is loaded).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::SandboxConfig;
use crate::scheduler::SchedulerConfig;

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub redis_url: String,
    /// Language profile file; the built-in profiles are used when unset
    pub languages_path: Option<PathBuf>,
    pub sandbox: SandboxConfig,
    pub scheduler: SchedulerConfig,
}

impl JudgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let sandbox_defaults = SandboxConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        let compile_time_limit_ms: u64 = parse_or(
            &lookup,
            "COMPILE_TIME_LIMIT_MS",
            sandbox_defaults.compile_time_limit.as_millis() as u64,
        )?;

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.into()),
            languages_path: lookup("LANGUAGES_CONFIG").map(PathBuf::from),
            sandbox: SandboxConfig {
                compile_time_limit: Duration::from_millis(compile_time_limit_ms),
                max_output_bytes: parse_or(
                    &lookup,
                    "MAX_OUTPUT_BYTES",
                    sandbox_defaults.max_output_bytes,
                )?,
                work_root: lookup("JUDGE_WORK_ROOT").map(PathBuf::from),
            },
            scheduler: SchedulerConfig {
                max_concurrency: parse_or(
                    &lookup,
                    "JUDGE_MAX_CONCURRENCY",
                    scheduler_defaults.max_concurrency,
                )?,
                queue_capacity: parse_or(
                    &lookup,
                    "JUDGE_QUEUE_CAPACITY",
                    scheduler_defaults.queue_capacity,
                )?,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, value)),
        None => Ok(default),
    }
}
