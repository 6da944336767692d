//! Execution coordination over a task graph.
//!
//! The coordinator is the single writer of task status. It dispatches
//! ready tasks to worker sessions according to the execution policy,
//! settles their outcomes, propagates enrichment to dependents, and
//! cascades cancellation through the dependent subtree of a failure.

use crate::core::{TaskGraph, TaskId, TaskStatus};
use crate::error::Result;
use crate::output::{self, ParsedOutput};
use crate::session::{SessionId, SessionManager, TaskOutcome};
use crate::workspace::WorkspaceIsolator;
use crate::{clog, clog_debug, clog_warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// How ready tasks are scheduled onto sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One task at a time, in priority order. A failure halts dispatch.
    Sequential,
    /// Up to `max_parallel` tasks at once; the ready set is recomputed
    /// on every settle.
    Parallel,
    /// Level-synchronous: all tasks of one dependency level run before
    /// any task of the next level starts.
    Adaptive,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// Scheduling policy for one execution run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionPolicy {
    pub mode: ExecutionMode,
    pub max_parallel: usize,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_parallel: 4,
        }
    }
}

/// Progress events emitted while a run executes.
///
/// Delivery is best-effort; a closed or absent receiver never stalls
/// the run.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    TaskStarted {
        task_id: TaskId,
        title: String,
        role: String,
    },
    TaskCompleted {
        task_id: TaskId,
        quality: f64,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    TaskCancelled {
        task_id: TaskId,
        reason: String,
    },
    ExecutionFinished {
        completed: usize,
        failed: usize,
        cancelled: usize,
    },
}

/// Final accounting for one execution run.
#[derive(Debug)]
pub struct ExecutionReport {
    /// True when every task in the graph completed.
    pub success: bool,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Parsed outputs of completed tasks.
    pub results: HashMap<TaskId, ParsedOutput>,
    /// Worker wall time per settled task.
    pub task_durations: HashMap<TaskId, Duration>,
    pub wall_time: Duration,
}

/// One task settling, reported back from its runner.
struct Settle {
    task_id: TaskId,
    session_id: Option<SessionId>,
    result: std::result::Result<TaskOutcome, String>,
}

/// Drives a task graph to completion through the session pool.
pub struct ExecutionCoordinator {
    manager: SessionManager,
    workspaces: Arc<Mutex<WorkspaceIsolator>>,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<ExecutionEvent>>,
}

impl ExecutionCoordinator {
    pub fn new(manager: SessionManager, workspaces: WorkspaceIsolator) -> Self {
        Self {
            manager,
            workspaces: Arc::new(Mutex::new(workspaces)),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    /// Attach a progress event channel.
    pub fn with_events(mut self, events: mpsc::Sender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Request cancellation of the current run.
    ///
    /// Running workers are force-terminated; completed results are kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the graph to quiescence.
    ///
    /// Returns when every task is terminal, dispatch has halted after a
    /// sequential failure, or the run was cancelled.
    pub async fn execute(
        &self,
        graph: Arc<RwLock<TaskGraph>>,
        policy: ExecutionPolicy,
    ) -> Result<ExecutionReport> {
        let started = Instant::now();
        clog!(
            "Coordinator: executing graph mode={} max_parallel={}",
            policy.mode,
            policy.max_parallel
        );

        let levels = match policy.mode {
            ExecutionMode::Adaptive => Some(graph.write().await.dependency_levels().clone()),
            _ => None,
        };
        let mut current_level = 0usize;

        let (tx, mut rx) = mpsc::channel::<Settle>(64);
        let mut in_flight: HashSet<TaskId> = HashSet::new();
        let mut results: HashMap<TaskId, ParsedOutput> = HashMap::new();
        let mut durations: HashMap<TaskId, Duration> = HashMap::new();
        let mut halted = false;

        loop {
            if !halted && !self.cancel.is_cancelled() {
                let batch = self
                    .pick_ready(&graph, &policy, &in_flight, levels.as_ref(), &mut current_level)
                    .await;
                for task_id in batch {
                    in_flight.insert(task_id);
                    self.dispatch(task_id, &graph, tx.clone()).await;
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                settle = rx.recv() => {
                    let Some(settle) = settle else { break };
                    in_flight.remove(&settle.task_id);
                    self.handle_settle(settle, &graph, &policy, &mut results, &mut durations, &mut halted)
                        .await;
                }
                _ = self.cancel.cancelled() => {
                    self.abort_run(&graph).await;
                    break;
                }
            }
        }

        // A cancel that raced the last settle still needs the sweep
        if self.cancel.is_cancelled() {
            self.abort_run(&graph).await;
        }

        let report = {
            let graph = graph.read().await;
            let completed = graph.completed_count();
            let failed = graph.count_where(|s| matches!(s, TaskStatus::Failed { .. }));
            let cancelled = graph.count_where(|s| matches!(s, TaskStatus::Cancelled { .. }));
            ExecutionReport {
                success: completed == graph.task_count(),
                completed,
                failed,
                cancelled,
                results,
                task_durations: durations,
                wall_time: started.elapsed(),
            }
        };
        clog!(
            "Coordinator: run finished completed={} failed={} cancelled={} in {:?}",
            report.completed,
            report.failed,
            report.cancelled,
            report.wall_time
        );
        self.emit(ExecutionEvent::ExecutionFinished {
            completed: report.completed,
            failed: report.failed,
            cancelled: report.cancelled,
        })
        .await;
        Ok(report)
    }

    /// Select the next tasks to dispatch under the policy.
    async fn pick_ready(
        &self,
        graph: &Arc<RwLock<TaskGraph>>,
        policy: &ExecutionPolicy,
        in_flight: &HashSet<TaskId>,
        levels: Option<&HashMap<TaskId, usize>>,
        current_level: &mut usize,
    ) -> Vec<TaskId> {
        let graph = graph.read().await;
        let mut ready = graph.ready_tasks();
        ready.retain(|id| !in_flight.contains(id));
        ready.sort_by_key(|id| {
            graph
                .get_task(id)
                .map(|t| (t.priority, t.created_at))
                .unwrap_or((u32::MAX, chrono::Utc::now()))
        });

        if let Some(levels) = levels {
            // Advance only once the current level has fully drained
            let level_drained = in_flight.is_empty()
                && !ready
                    .iter()
                    .any(|id| levels.get(id).copied() == Some(*current_level));
            if level_drained {
                if let Some(next) = ready.iter().filter_map(|id| levels.get(id).copied()).min() {
                    *current_level = next;
                }
            }
            let level = *current_level;
            ready.retain(|id| levels.get(id).copied() == Some(level));
        }

        let slots = match policy.mode {
            ExecutionMode::Sequential => usize::from(in_flight.is_empty()),
            _ => policy.max_parallel.saturating_sub(in_flight.len()),
        };
        ready.truncate(slots);
        ready
    }

    /// Start one task: session, workspace, then the worker itself.
    ///
    /// Pre-execution failures settle immediately as task failures; a
    /// sibling task is never affected.
    async fn dispatch(
        &self,
        task_id: TaskId,
        graph: &Arc<RwLock<TaskGraph>>,
        tx: mpsc::Sender<Settle>,
    ) {
        let (prompt, role, title) = {
            let mut graph = graph.write().await;
            let Some(task) = graph.get_task_mut(&task_id) else {
                return;
            };
            task.start();
            (
                format!("{}{}", task.prompt, output::render_inputs(&task.inputs)),
                task.role.clone(),
                task.title.clone(),
            )
        };
        clog_debug!(
            "Coordinator: dispatching task {} role={}",
            task_id.short(),
            role
        );
        self.emit(ExecutionEvent::TaskStarted {
            task_id,
            title,
            role: role.clone(),
        })
        .await;

        let session_id = match self.manager.create_session(&role).await {
            Ok(id) => id,
            Err(e) => {
                let _ = tx
                    .send(Settle {
                        task_id,
                        session_id: None,
                        result: Err(e.to_string()),
                    })
                    .await;
                return;
            }
        };

        let workspace = {
            let mut workspaces = self.workspaces.lock().await;
            workspaces.create(&session_id.short(), &task_id)
        };
        let workspace = match workspace {
            Ok(workspace) => workspace,
            Err(e) => {
                let _ = self.manager.terminate_session(&session_id).await;
                let _ = tx
                    .send(Settle {
                        task_id,
                        session_id: Some(session_id),
                        result: Err(e.to_string()),
                    })
                    .await;
                return;
            }
        };

        {
            let mut graph = graph.write().await;
            if let Some(task) = graph.get_task_mut(&task_id) {
                task.set_workspace(workspace.path.clone(), &workspace.branch);
            }
        }
        if let Err(e) = self.manager.assign_workspace(&session_id, workspace).await {
            let _ = tx
                .send(Settle {
                    task_id,
                    session_id: Some(session_id),
                    result: Err(e.to_string()),
                })
                .await;
            return;
        }

        let manager = self.manager.clone();
        tokio::spawn(async move {
            let result = manager
                .execute_task(&session_id, &task_id, &prompt)
                .await
                .map_err(|e| e.to_string());
            let _ = tx
                .send(Settle {
                    task_id,
                    session_id: Some(session_id),
                    result,
                })
                .await;
        });
    }

    /// Settle one task: record the outcome, propagate or cascade.
    async fn handle_settle(
        &self,
        settle: Settle,
        graph: &Arc<RwLock<TaskGraph>>,
        policy: &ExecutionPolicy,
        results: &mut HashMap<TaskId, ParsedOutput>,
        durations: &mut HashMap<TaskId, Duration>,
        halted: &mut bool,
    ) {
        let task_id = settle.task_id;
        if let Some(session_id) = settle.session_id {
            let _ = self.manager.terminate_session(&session_id).await;
        }
        self.workspaces.lock().await.destroy(&task_id);

        match settle.result {
            Ok(outcome) if outcome.success => {
                durations.insert(task_id, outcome.duration);
                let parsed = {
                    let mut graph = graph.write().await;
                    let role = graph
                        .get_task(&task_id)
                        .map(|t| t.role.clone())
                        .unwrap_or_default();
                    let parsed = output::parse(&task_id, &role, &outcome.output);
                    let entries = output::enrichment(&parsed);
                    if let Some(task) = graph.get_task_mut(&task_id) {
                        task.outputs = entries.clone();
                        task.complete();
                    }
                    for dependent_id in graph.dependents_of(&task_id) {
                        if let Some(dependent) = graph.get_task_mut(&dependent_id) {
                            output::merge_enrichment(&mut dependent.inputs, &entries);
                        }
                    }
                    parsed
                };
                clog_debug!(
                    "Coordinator: task {} completed quality={:.2}",
                    task_id.short(),
                    parsed.quality
                );
                self.emit(ExecutionEvent::TaskCompleted {
                    task_id,
                    quality: parsed.quality,
                })
                .await;
                results.insert(task_id, parsed);
            }
            Ok(outcome) => {
                durations.insert(task_id, outcome.duration);
                let error = outcome
                    .error
                    .unwrap_or_else(|| "worker failed without detail".to_string());
                self.fail_and_cascade(graph, task_id, &error).await;
                if policy.mode == ExecutionMode::Sequential {
                    *halted = true;
                }
            }
            Err(error) => {
                self.fail_and_cascade(graph, task_id, &error).await;
                if policy.mode == ExecutionMode::Sequential {
                    *halted = true;
                }
            }
        }
    }

    /// Fail a task and cancel exactly its dependent subtree.
    async fn fail_and_cascade(
        &self,
        graph: &Arc<RwLock<TaskGraph>>,
        task_id: TaskId,
        error: &str,
    ) {
        clog_warn!("Coordinator: task {} failed: {}", task_id.short(), error);
        let cancelled = {
            let mut graph = graph.write().await;
            if let Some(task) = graph.get_task_mut(&task_id) {
                task.fail(error);
            }
            let mut cancelled = Vec::new();
            for dependent_id in graph.dependent_subtree(&task_id) {
                if let Some(dependent) = graph.get_task_mut(&dependent_id) {
                    if !dependent.is_terminal() {
                        dependent.cancel("dependency failed");
                        cancelled.push(dependent_id);
                    }
                }
            }
            cancelled
        };

        self.emit(ExecutionEvent::TaskFailed {
            task_id,
            error: error.to_string(),
        })
        .await;
        for dependent_id in cancelled {
            self.emit(ExecutionEvent::TaskCancelled {
                task_id: dependent_id,
                reason: "dependency failed".to_string(),
            })
            .await;
        }
    }

    /// Cancellation sweep: stop workers, cancel remaining tasks, release
    /// workspaces. Completed results are left untouched.
    async fn abort_run(&self, graph: &Arc<RwLock<TaskGraph>>) {
        clog!("Coordinator: cancelling run");
        self.manager.terminate_all().await;

        let cancelled = {
            let mut graph = graph.write().await;
            let mut cancelled = Vec::new();
            for task_id in graph.task_ids() {
                if let Some(task) = graph.get_task_mut(&task_id) {
                    if !task.is_terminal() {
                        task.cancel("execution cancelled");
                        cancelled.push(task_id);
                    }
                }
            }
            cancelled
        };
        for task_id in cancelled {
            self.emit(ExecutionEvent::TaskCancelled {
                task_id,
                reason: "execution cancelled".to_string(),
            })
            .await;
        }

        self.workspaces.lock().await.destroy_all();
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event).await;
        }
    }
}
