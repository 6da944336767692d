//! Task dependency graph for coordinated execution.
//!
//! TaskGraph wraps a petgraph DiGraph where nodes are tasks and edges
//! point from a dependency to its dependent. It answers the scheduling
//! questions the coordinator asks: which tasks are ready, what depends
//! on a failed task, and which dependency level each task sits at.

use crate::core::task::{GraphId, Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Why one task must complete before another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Ordering from the static role precedence table.
    Precedence,
    /// The dependent consumes the dependency's structured output.
    Data,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Precedence => write!(f, "precedence"),
            DependencyKind::Data => write!(f, "data"),
        }
    }
}

/// The task dependency graph.
///
/// Edges run from dependency to dependent. The graph is kept acyclic by
/// validating every edge insertion. Dependency levels are memoized and
/// the cache is invalidated on any structural change.
pub struct TaskGraph {
    /// Unique identifier for this graph.
    pub id: GraphId,
    /// Identifier of the execution session this graph belongs to, once bound.
    pub session_id: Option<String>,
    /// When the graph was built.
    pub created_at: DateTime<Utc>,
    graph: DiGraph<Task, DependencyKind>,
    task_index: HashMap<TaskId, NodeIndex>,
    level_cache: Option<HashMap<TaskId, usize>>,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            id: GraphId::new(),
            session_id: None,
            created_at: Utc::now(),
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            level_cache: None,
        }
    }

    /// Add a task to the graph.
    ///
    /// If a task with the same ID already exists, the existing node is kept.
    pub fn add_task(&mut self, task: Task) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&task.id) {
            return index;
        }
        let id = task.id;
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        self.level_cache = None;
        index
    }

    /// Add a dependency edge: `from` must complete before `to` can start.
    ///
    /// Also records the dependency on the dependent task's own list so
    /// the task carries its prerequisites when serialized.
    ///
    /// # Errors
    /// Returns an error if either task is missing or the edge would
    /// create a cycle.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId, kind: DependencyKind) -> Result<()> {
        let from_index = *self
            .task_index
            .get(from)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", from)))?;
        let to_index = *self
            .task_index
            .get(to)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", to)))?;

        // Add tentatively, then verify acyclicity
        let edge = self.graph.add_edge(from_index, to_index, kind);
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::Validation(format!(
                "Adding dependency from {} to {} would create a cycle",
                from, to
            )));
        }

        if let Some(task) = self.graph.node_weight_mut(to_index) {
            if !task.dependencies.contains(from) {
                task.dependencies.push(*from);
            }
        }
        self.level_cache = None;
        Ok(())
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// IDs of all tasks in the graph.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.graph.node_weights().map(|t| t.id).collect()
    }

    /// All tasks in the graph.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// IDs of the tasks the given task directly depends on.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    /// IDs of the tasks that directly depend on the given task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: petgraph::Direction) -> Vec<TaskId> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, direction)
                .filter_map(|n| self.graph.node_weight(n).map(|t| t.id))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// IDs of every task reachable from the given task by following
    /// dependent edges, excluding the task itself.
    pub fn dependent_subtree(&self, id: &TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<TaskId> = self.dependents_of(id).into();
        let mut result = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            result.push(next);
            queue.extend(self.dependents_of(&next));
        }
        result
    }

    /// Tasks ready to dispatch: Pending, with every dependency Completed.
    ///
    /// Derived entirely from task statuses, so the answer is consistent
    /// as long as the caller is the single status writer.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let task = self.graph.node_weight(index)?;
                if !task.can_start() {
                    return None;
                }
                let deps_done = self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|t| t.status == TaskStatus::Completed)
                            .unwrap_or(false)
                    });
                if deps_done {
                    Some(task.id)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Check if every task has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.graph.node_weights().all(|t| t.is_terminal())
    }

    /// Count of tasks in the given status class.
    pub fn count_where(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.graph
            .node_weights()
            .filter(|t| predicate(&t.status))
            .count()
    }

    pub fn completed_count(&self) -> usize {
        self.count_where(|s| *s == TaskStatus::Completed)
    }

    /// Tasks in topological order, priority-stable within ties.
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle (should never
    /// happen since add_dependency validates against cycles).
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let title = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.title.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at task: {}", title))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index).map(|t| t.id))
            .collect())
    }

    /// Dependency level of every task: tasks with no dependencies are at
    /// level 0, and each task sits one level above its deepest dependency.
    ///
    /// The result is memoized; structural mutations invalidate the cache.
    pub fn dependency_levels(&mut self) -> &HashMap<TaskId, usize> {
        if self.level_cache.is_none() {
            self.level_cache = Some(self.compute_levels());
        }
        // Cache was just populated above
        self.level_cache.as_ref().unwrap_or_else(|| unreachable!())
    }

    fn compute_levels(&self) -> HashMap<TaskId, usize> {
        let mut levels: HashMap<TaskId, usize> = HashMap::new();
        let mut indegree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut queue = VecDeque::new();

        for index in self.graph.node_indices() {
            let degree = self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .count();
            indegree.insert(index, degree);
            if degree == 0 {
                queue.push_back(index);
                if let Some(task) = self.graph.node_weight(index) {
                    levels.insert(task.id, 0);
                }
            }
        }

        while let Some(index) = queue.pop_front() {
            let level = self
                .graph
                .node_weight(index)
                .and_then(|t| levels.get(&t.id).copied())
                .unwrap_or(0);
            for next in self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
            {
                if let Some(task) = self.graph.node_weight(next) {
                    let entry = levels.entry(task.id).or_insert(0);
                    *entry = (*entry).max(level + 1);
                }
                if let Some(degree) = indegree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        levels
    }

    /// Tasks unreachable from any zero-dependency root.
    ///
    /// A well-formed build produces none; nodes stranded by edge pruning
    /// show up here.
    pub fn disconnected_tasks(&self) -> Vec<TaskId> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();

        for index in self.graph.node_indices() {
            if self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .count()
                == 0
            {
                queue.push_back(index);
            }
        }

        while let Some(index) = queue.pop_front() {
            if !reachable.insert(index) {
                continue;
            }
            for next in self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
            {
                queue.push_back(next);
            }
        }

        self.graph
            .node_indices()
            .filter(|index| !reachable.contains(index))
            .filter_map(|index| self.graph.node_weight(index).map(|t| t.id))
            .collect()
    }

    /// Remove a task and clean up dangling references to it.
    ///
    /// Every surviving task that listed the removed task as a dependency
    /// has that entry dropped.
    pub fn remove_task(&mut self, id: &TaskId) -> Option<Task> {
        let index = self.task_index.remove(id)?;
        let removed = self.graph.remove_node(index)?;

        // remove_node swaps the last node into the removed slot;
        // rebuild the index to stay consistent.
        self.task_index.clear();
        for index in self.graph.node_indices() {
            if let Some(task) = self.graph.node_weight(index) {
                self.task_index.insert(task.id, index);
            }
        }
        for task in self.graph.node_weights_mut() {
            task.dependencies.retain(|dep| dep != id);
        }
        self.level_cache = None;
        Some(removed)
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("id", &self.id.short())
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
