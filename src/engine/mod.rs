//! Judging engine: sandboxed execution, output comparison and per-case evaluation

pub mod comparator;
pub mod evaluator;
pub mod sandbox;

pub use evaluator::{CaseOutcome, Evaluator};
pub use sandbox::{ExecutionResult, Executor, Sandbox, SandboxConfig};
