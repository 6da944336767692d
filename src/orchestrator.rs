//! Top-level facade: request in, execution result out.
//!
//! The orchestrator wires planning, sessions, workspaces, and the
//! coordinator together for one execution run, tracks live runs for
//! progress queries and cancellation, and writes an advisory JSON
//! record of each finished run. Persistence is best-effort; a failed
//! write never fails the run.

use crate::backend::{ProcessBackend, WorkerBackend};
use crate::config::Config;
use crate::coordinator::{
    ExecutionCoordinator, ExecutionEvent, ExecutionMode, ExecutionPolicy, ExecutionReport,
};
use crate::core::{GraphId, Task, TaskGraph, TaskId, TaskStatus};
use crate::error::Result;
use crate::output::ParsedOutput;
use crate::planning::{BuildConstraints, GraphBuilder, RequestContext, RoleTable};
use crate::session::{SessionManager, SessionStats};
use crate::workspace::WorkspaceIsolator;
use crate::{clog, clog_warn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Caller-facing knobs for one run.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub mode: ExecutionMode,
    /// Concurrency bound; defaults to the configured session pool size.
    pub max_parallel: Option<usize>,
    /// Cap on generated tasks; defaults to the planner's own cap.
    pub max_nodes: Option<usize>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_parallel: None,
            max_nodes: None,
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// Snapshot of a run for progress queries.
#[derive(Debug, Clone)]
pub struct Progress {
    pub phase: Phase,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    /// Tasks currently running.
    pub running: Vec<TaskId>,
}

/// Final result of one orchestrated run.
#[derive(Debug)]
pub struct ExecutionResult {
    pub session_id: String,
    pub graph_id: GraphId,
    pub success: bool,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub task_count: usize,
    /// Parsed output per completed task.
    pub results: HashMap<TaskId, ParsedOutput>,
    /// Planner warnings (pruned roles, generalist fallback).
    pub warnings: Vec<String>,
    pub wall_time: Duration,
    pub task_durations: HashMap<TaskId, Duration>,
    pub session_stats: SessionStats,
}

/// Advisory on-disk record of a finished run. Tasks carry their final
/// status, enrichment inputs, and extracted outputs.
#[derive(Serialize)]
struct RunRecord<'a> {
    session_id: &'a str,
    request: &'a str,
    success: bool,
    completed: usize,
    failed: usize,
    cancelled: usize,
    finished_at: DateTime<Utc>,
    tasks: &'a [Task],
    results: &'a HashMap<TaskId, ParsedOutput>,
}

/// Advisory progress record, rewritten on phase transitions.
#[derive(Serialize)]
struct ProgressRecord<'a> {
    session_id: &'a str,
    phase: Phase,
    completed: usize,
    total: usize,
    updated_at: DateTime<Utc>,
}

struct RunHandle {
    graph: Arc<RwLock<TaskGraph>>,
    cancel: CancellationToken,
    phase: Phase,
}

/// Entry point for executing natural-language requests against a repo.
pub struct Orchestrator {
    config: Config,
    repo_path: PathBuf,
    backend: Arc<dyn WorkerBackend>,
    worktrees_dir: PathBuf,
    state_dir: Option<PathBuf>,
    runs: Arc<RwLock<HashMap<String, RunHandle>>>,
}

impl Orchestrator {
    /// Build an orchestrator for a repository using the loaded config.
    pub fn new(repo_path: &Path, config: Config) -> Result<Self> {
        let backend = Arc::new(ProcessBackend::from_command(config.effective_command())?);
        let worktrees_dir = Config::worktrees_dir()?;
        let state_dir = Config::state_dir().ok();
        Ok(Self {
            config,
            repo_path: repo_path.to_path_buf(),
            backend,
            worktrees_dir,
            state_dir,
            runs: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Build with an explicit backend and directories; used by tests.
    pub fn with_backend(
        repo_path: &Path,
        config: Config,
        backend: Arc<dyn WorkerBackend>,
        worktrees_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            repo_path: repo_path.to_path_buf(),
            backend,
            worktrees_dir,
            state_dir: None,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override where run records are written.
    pub fn with_state_dir(mut self, state_dir: PathBuf) -> Self {
        self.state_dir = Some(state_dir);
        self
    }

    /// Plan and execute a request.
    pub async fn execute(
        &self,
        request: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        self.run(request, options, None).await
    }

    /// Plan and execute a request, streaming progress events.
    pub async fn execute_with_events(
        &self,
        request: &str,
        options: &ExecutionOptions,
        events: mpsc::Sender<ExecutionEvent>,
    ) -> Result<ExecutionResult> {
        self.run(request, options, Some(events)).await
    }

    async fn run(
        &self,
        request: &str,
        options: &ExecutionOptions,
        events: Option<mpsc::Sender<ExecutionEvent>>,
    ) -> Result<ExecutionResult> {
        let session_id = Uuid::new_v4().to_string();
        clog!(
            "Orchestrator: run {} mode={} request={:?}",
            &session_id[..8],
            options.mode,
            request
        );

        let mut constraints = BuildConstraints::default();
        if let Some(max_nodes) = options.max_nodes {
            constraints.max_nodes = max_nodes;
        }
        let context = detect_context(&self.repo_path);
        let builder = GraphBuilder::new(RoleTable::default_roster());
        let built = builder.build_graph(request, &context, &constraints)?;
        for warning in &built.warnings {
            clog_warn!("Orchestrator: planner warning: {}", warning);
        }

        let mut graph = built.graph;
        graph.session_id = Some(session_id.clone());
        let graph_id = graph.id;
        let task_count = graph.task_count();
        let graph = Arc::new(RwLock::new(graph));

        let manager = SessionManager::new(
            Arc::clone(&self.backend),
            self.config.max_sessions,
            self.config.task_timeout(),
        );
        let monitor = manager.spawn_heartbeat_monitor(
            self.config.heartbeat_interval(),
            self.config.task_timeout(),
        );
        // One worktree subdirectory per run keeps concurrent runs apart
        let workspaces = WorkspaceIsolator::new(
            &self.repo_path,
            self.worktrees_dir.join(&session_id[..8]),
        )?;
        let mut coordinator = ExecutionCoordinator::new(manager.clone(), workspaces);
        if let Some(events) = events {
            coordinator = coordinator.with_events(events);
        }

        {
            let mut runs = self.runs.write().await;
            runs.insert(
                session_id.clone(),
                RunHandle {
                    graph: Arc::clone(&graph),
                    cancel: coordinator.cancel_token(),
                    phase: Phase::Executing,
                },
            );
        }
        self.persist_progress(&session_id, Phase::Executing, 0, task_count);

        let policy = ExecutionPolicy {
            mode: options.mode,
            max_parallel: options
                .max_parallel
                .unwrap_or(self.config.max_sessions)
                .min(self.config.max_sessions),
        };
        let report = coordinator.execute(Arc::clone(&graph), policy).await?;

        manager.shutdown();
        let _ = monitor.await;
        let session_stats = manager.statistics().await;

        let phase = if report.success {
            Phase::Completed
        } else if coordinator.cancel_token().is_cancelled() {
            Phase::Cancelled
        } else {
            Phase::Failed
        };
        {
            let mut runs = self.runs.write().await;
            if let Some(handle) = runs.get_mut(&session_id) {
                handle.phase = phase;
            }
        }

        self.persist_progress(&session_id, phase, report.completed, task_count);
        let tasks: Vec<Task> = {
            let graph = graph.read().await;
            graph.all_tasks().into_iter().cloned().collect()
        };
        self.persist_record(&session_id, request, &report, &tasks);

        Ok(ExecutionResult {
            session_id,
            graph_id,
            success: report.success,
            completed: report.completed,
            failed: report.failed,
            cancelled: report.cancelled,
            task_count,
            results: report.results,
            warnings: built.warnings,
            wall_time: report.wall_time,
            task_durations: report.task_durations,
            session_stats,
        })
    }

    /// Snapshot of a known run, or None for an unknown session ID.
    pub async fn progress(&self, session_id: &str) -> Option<Progress> {
        let runs = self.runs.read().await;
        let handle = runs.get(session_id)?;
        let graph = handle.graph.read().await;
        let running = graph
            .all_tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id)
            .collect();
        Some(Progress {
            phase: handle.phase,
            completed: graph.completed_count(),
            failed: graph.count_where(|s| matches!(s, TaskStatus::Failed { .. })),
            total: graph.task_count(),
            running,
        })
    }

    /// Session IDs of runs still executing.
    pub async fn active_sessions(&self) -> Vec<String> {
        let runs = self.runs.read().await;
        runs.iter()
            .filter(|(_, handle)| handle.phase == Phase::Executing)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cancel a running session. Returns false when the session is
    /// unknown or already finished.
    pub async fn cancel(&self, session_id: &str) -> bool {
        let runs = self.runs.read().await;
        match runs.get(session_id) {
            Some(handle) if handle.phase == Phase::Executing => {
                clog!("Orchestrator: cancelling run {}", &session_id[..8]);
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn persist_record(
        &self,
        session_id: &str,
        request: &str,
        report: &ExecutionReport,
        tasks: &[Task],
    ) {
        let Some(state_dir) = &self.state_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(state_dir) {
            clog_warn!("Failed to create state dir: {}", e);
            return;
        }
        let record = RunRecord {
            session_id,
            request,
            success: report.success,
            completed: report.completed,
            failed: report.failed,
            cancelled: report.cancelled,
            finished_at: Utc::now(),
            tasks,
            results: &report.results,
        };
        let path = state_dir.join(format!("{}.json", session_id));
        match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    clog_warn!("Failed to write run record {}: {}", path.display(), e);
                }
            }
            Err(e) => clog_warn!("Failed to serialize run record: {}", e),
        }
    }

    fn persist_progress(&self, session_id: &str, phase: Phase, completed: usize, total: usize) {
        let Some(state_dir) = &self.state_dir else {
            return;
        };
        if std::fs::create_dir_all(state_dir).is_err() {
            return;
        }
        let record = ProgressRecord {
            session_id,
            phase,
            completed,
            total,
            updated_at: Utc::now(),
        };
        let path = state_dir.join(format!("{}.progress.json", session_id));
        if let Ok(json) = serde_json::to_string_pretty(&record) {
            if let Err(e) = std::fs::write(&path, json) {
                clog_warn!("Failed to write progress record {}: {}", path.display(), e);
            }
        }
    }
}

/// Light repository sniffing for planner context.
fn detect_context(repo_path: &Path) -> RequestContext {
    let exists = |name: &str| repo_path.join(name).exists();
    let detected_language = if exists("Cargo.toml") {
        Some("rust".to_string())
    } else if exists("go.mod") {
        Some("go".to_string())
    } else if exists("pyproject.toml") || exists("requirements.txt") {
        Some("python".to_string())
    } else if exists("package.json") {
        Some("javascript".to_string())
    } else {
        None
    };
    let detected_framework = std::fs::read_to_string(repo_path.join("package.json"))
        .ok()
        .and_then(|manifest| {
            if manifest.contains("\"next\"") {
                Some("nextjs".to_string())
            } else if manifest.contains("\"react\"") {
                Some("react".to_string())
            } else if manifest.contains("\"express\"") {
                Some("express".to_string())
            } else {
                None
            }
        });
    RequestContext {
        repository_path: Some(repo_path.to_string_lossy().to_string()),
        detected_framework,
        detected_language,
    }
}
