pub mod error;
pub mod verdict;

pub use error::{JudgeError, SandboxError, StoreError, UnsupportedLanguage};
pub use verdict::{SubmissionStatus, Verdict};
