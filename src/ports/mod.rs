pub mod executor;

pub use executor::{ExecutorError, ExecutorResult, ProcessInfo, ToolExecutor};
