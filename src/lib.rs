//! Olympiad judge: compiles and runs untrusted submissions against problem
//! test cases and records one terminal verdict per submission.

pub mod config;
pub mod core;
pub mod engine;
pub mod judger;
pub mod languages;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use crate::config::JudgeConfig;
pub use crate::core::{JudgeError, SubmissionStatus, Verdict};
pub use crate::judger::{JudgeReport, Judger, TestcaseResult};
pub use crate::languages::{LanguageProfile, LanguageRegistry};
pub use crate::scheduler::{Enqueued, JudgeScheduler, SchedulerConfig};
pub use crate::store::{MemoryStore, RedisStore, SubmissionQueue, SubmissionStore};
