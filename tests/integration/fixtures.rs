//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary git repositories
//! - A scripted mock worker backend
//! - Predefined task graphs

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use conductor::backend::{Heartbeat, RawResult, WorkerBackend};
use conductor::coordinator::ExecutionCoordinator;
use conductor::core::{DependencyKind, Task, TaskGraph, TaskId};
use conductor::session::SessionManager;
use conductor::workspace::WorkspaceIsolator;

/// A test repository with a temporary directory and initialized git.
pub struct TestRepo {
    /// The temporary directory containing the repo.
    pub temp_dir: TempDir,
    /// Path to the repository root.
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new test repository with an initial commit.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("repo");
        std::fs::create_dir_all(&path).expect("Failed to create repo dir");

        git(&path, &["init"]);
        git(&path, &["config", "user.email", "test@test.com"]);
        git(&path, &["config", "user.name", "Test User"]);

        std::fs::write(path.join("README.md"), "# Test Repository\n")
            .expect("Failed to write README");
        git(&path, &["add", "."]);
        git(&path, &["commit", "-m", "Initial commit"]);

        Self { temp_dir, path }
    }

    /// Directory for this repo's worktrees, outside the checkout.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.temp_dir.path().join("worktrees")
    }
}

fn git(path: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Scripted worker backend.
///
/// Succeeds with a marker-bearing output by default. Prompts containing
/// a `fail_on` needle fail; prompts containing a `hang_on` needle sleep
/// through the timeout and report `timed_out`, mimicking the process
/// backend's own timeout behavior.
pub struct MockBackend {
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    delay: Duration,
    output: String,
    fail_on: Vec<String>,
    hang_on: Vec<String>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            prompts: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_millis(10),
            output: "Created: src/generated.rs\n\n## Summary\nwork finished\n".to_string(),
            fail_on: Vec::new(),
            hang_on: Vec::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    pub fn hanging_on(mut self, needle: &str) -> Self {
        self.hang_on.push(needle.to_string());
        self
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerBackend for MockBackend {
    async fn execute(
        &self,
        prompt: &str,
        _workdir: &Path,
        timeout: Duration,
        heartbeat: &Heartbeat,
    ) -> conductor::Result<RawResult> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = if self.hang_on.iter().any(|n| prompt.contains(n)) {
            tokio::time::sleep(timeout).await;
            RawResult {
                success: false,
                output: String::new(),
                error: Some(format!("worker timed out after {:?}", timeout)),
                timed_out: true,
                exit_code: None,
                duration: timeout,
            }
        } else {
            tokio::time::sleep(self.delay).await;
            heartbeat.beat();
            if self.fail_on.iter().any(|n| prompt.contains(n)) {
                RawResult {
                    success: false,
                    output: String::new(),
                    error: Some("scripted failure".to_string()),
                    timed_out: false,
                    exit_code: Some(1),
                    duration: self.delay,
                }
            } else {
                RawResult {
                    success: true,
                    output: self.output.clone(),
                    error: None,
                    timed_out: false,
                    exit_code: Some(0),
                    duration: self.delay,
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

/// Coordinator wired to a mock backend and a fresh test repo.
pub fn coordinator_for(
    repo: &TestRepo,
    backend: Arc<dyn WorkerBackend>,
    max_sessions: usize,
    task_timeout: Duration,
) -> ExecutionCoordinator {
    let workspaces = WorkspaceIsolator::new(&repo.path, repo.worktrees_dir())
        .expect("Failed to create workspace isolator");
    let manager = SessionManager::new(backend, max_sessions, task_timeout);
    ExecutionCoordinator::new(manager, workspaces)
}

/// One root with two dependents: a <- b, a <- c.
pub fn fan_out_graph() -> (TaskGraph, TaskId, TaskId, TaskId) {
    let mut graph = TaskGraph::new();
    let a = Task::new("design", "architect", "design the system");
    let b = Task::new("backend", "backend", "build the api");
    let c = Task::new("frontend", "frontend", "build the ui");
    let (id_a, id_b, id_c) = (a.id, b.id, c.id);
    graph.add_task(a);
    graph.add_task(b);
    graph.add_task(c);
    graph
        .add_dependency(&id_a, &id_b, DependencyKind::Precedence)
        .unwrap();
    graph
        .add_dependency(&id_a, &id_c, DependencyKind::Precedence)
        .unwrap();
    (graph, id_a, id_b, id_c)
}

/// N independent tasks.
pub fn independent_tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| Task::new(&format!("task-{}", i), "backend", &format!("do part {}", i)))
        .collect()
}
