//! Worker session pool.

pub mod manager;

pub use manager::{
    SessionId, SessionManager, SessionState, SessionStats, TaskOutcome, WorkerSession,
};
