pub mod backend;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod git;
pub mod log;
pub mod orchestrator;
pub mod output;
pub mod planning;
pub mod session;
pub mod workspace;

pub use config::Config;
pub use coordinator::{ExecutionEvent, ExecutionMode, ExecutionPolicy};
pub use crate::core::{Task, TaskGraph, TaskId, TaskStatus};
pub use error::{Error, Result};
pub use orchestrator::{ExecutionOptions, ExecutionResult, Orchestrator, Progress};
pub use session::{SessionId, SessionManager, SessionState};
