//! Task data model for the execution graph.
//!
//! Tasks are the atomic units of work assigned to worker sessions. Each
//! task tracks its role, dependencies, enrichment inputs, status, and
//! workspace location.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a task within a graph.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a built task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(pub Uuid);

impl GraphId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status in its lifecycle.
///
/// Completed, Failed, and Cancelled are terminal: no transition leaves
/// them once entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but not yet dispatched.
    Pending,
    /// Task is currently being executed by a worker session.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task was cancelled before completing.
    Cancelled {
        /// Reason the task was cancelled.
        reason: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

/// A single task in the execution graph.
///
/// Tasks carry the role they were generated for, the prompt the worker
/// will receive, enrichment inputs merged in from completed dependencies,
/// and the structured outputs extracted from the worker's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable title for the task.
    pub title: String,
    /// Role this task was generated for (e.g. "architect", "backend").
    pub role: String,
    /// Base prompt for the worker, before enrichment inputs are appended.
    pub prompt: String,
    /// IDs of tasks that must complete before this one can start.
    pub dependencies: Vec<TaskId>,
    /// Dispatch priority within the graph (lower runs first in sequential mode).
    pub priority: u32,
    /// Current execution status.
    pub status: TaskStatus,
    /// Enrichment inputs merged in from completed dependencies.
    pub inputs: HashMap<String, Value>,
    /// Structured outputs extracted from the worker's response.
    pub outputs: HashMap<String, Value>,
    /// Path to the isolated workspace for this task.
    pub workspace_path: Option<PathBuf>,
    /// Name of the branch backing the workspace.
    pub branch_name: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task with the given title, role, and prompt.
    ///
    /// The task is created with Pending status, a generated ID, and
    /// current timestamp. Dependencies and enrichment start empty.
    pub fn new(title: &str, role: &str, prompt: &str) -> Self {
        Self {
            id: TaskId::new(),
            title: title.to_string(),
            role: role.to_string(),
            prompt: prompt.to_string(),
            dependencies: Vec::new(),
            priority: 0,
            status: TaskStatus::Pending,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            workspace_path: None,
            branch_name: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Start the task execution.
    ///
    /// Transitions status to Running and records the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task as successfully completed.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as cancelled with a reason.
    ///
    /// No-op if the task is already in a terminal state; completed
    /// results are never discarded by cancellation.
    pub fn cancel(&mut self, reason: &str) {
        if self.is_terminal() {
            return;
        }
        self.status = TaskStatus::Cancelled {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Record the workspace assigned to this task.
    pub fn set_workspace(&mut self, path: PathBuf, branch: &str) {
        self.workspace_path = Some(path);
        self.branch_name = Some(branch.to_string());
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Cancelled { .. }
        )
    }

    /// Check if the task can be dispatched.
    pub fn can_start(&self) -> bool {
        matches!(self.status, TaskStatus::Pending)
    }

    /// Wall-clock execution duration, if the task started and finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
