//! Core data model: tasks and the dependency graph.

pub mod graph;
pub mod task;

pub use graph::{DependencyKind, TaskGraph};
pub use task::{GraphId, Task, TaskId, TaskStatus};
