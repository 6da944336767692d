//! Parallel and adaptive scheduling correctness tests.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use conductor::coordinator::{ExecutionMode, ExecutionPolicy};
use conductor::core::{DependencyKind, Task, TaskGraph};

use crate::fixtures::{coordinator_for, fan_out_graph, independent_tasks, MockBackend, TestRepo};

/// Given a root with two dependents and max_parallel=2,
/// when the run finishes, all three tasks are completed.
#[tokio::test]
async fn test_fan_out_completes_under_parallel_limit() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new());
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_secs(30));
    let (graph, ..) = fan_out_graph();
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(
            Arc::clone(&graph),
            ExecutionPolicy {
                mode: ExecutionMode::Parallel,
                max_parallel: 2,
            },
        )
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.completed, 3);
    assert_eq!(report.results.len(), 3);
    assert!(graph.read().await.all_terminal());
}

/// Given 6 independent tasks and max_parallel=3,
/// no more than 3 workers are ever busy at once.
#[tokio::test]
async fn test_concurrency_never_exceeds_max_parallel() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(50)));
    let peak = Arc::clone(&backend.peak);
    let coordinator = coordinator_for(&repo, backend, 8, Duration::from_secs(30));

    let mut graph = TaskGraph::new();
    for task in independent_tasks(6) {
        graph.add_task(task);
    }
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(
            graph,
            ExecutionPolicy {
                mode: ExecutionMode::Parallel,
                max_parallel: 3,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.completed, 6);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

/// Sequential mode runs strictly one task at a time.
#[tokio::test]
async fn test_sequential_mode_is_serial() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(20)));
    let peak = Arc::clone(&backend.peak);
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_secs(30));

    let mut graph = TaskGraph::new();
    for task in independent_tasks(4) {
        graph.add_task(task);
    }
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(
            graph,
            ExecutionPolicy {
                mode: ExecutionMode::Sequential,
                max_parallel: 4,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.completed, 4);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

/// Adaptive mode never starts a join task before every task in the
/// previous level has settled.
#[tokio::test]
async fn test_adaptive_is_level_synchronous() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(25)));
    let prompts = Arc::clone(&backend.prompts);
    let coordinator = coordinator_for(&repo, backend, 8, Duration::from_secs(30));

    let mut graph = TaskGraph::new();
    let root_a = Task::new("root-a", "architect", "plan the schema");
    let root_b = Task::new("root-b", "database", "draft the tables");
    let join = Task::new("join", "backend", "wire the queries");
    let (id_a, id_b, id_join) = (root_a.id, root_b.id, join.id);
    graph.add_task(root_a);
    graph.add_task(root_b);
    graph.add_task(join);
    graph
        .add_dependency(&id_a, &id_join, DependencyKind::Precedence)
        .unwrap();
    graph
        .add_dependency(&id_b, &id_join, DependencyKind::Precedence)
        .unwrap();
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(
            graph,
            ExecutionPolicy {
                mode: ExecutionMode::Adaptive,
                max_parallel: 8,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.completed, 3);
    let prompts = prompts.lock().unwrap();
    let pos = |needle: &str| {
        prompts
            .iter()
            .position(|p| p.contains(needle))
            .unwrap_or_else(|| panic!("prompt containing {:?} not recorded", needle))
    };
    assert!(pos("wire the queries") > pos("plan the schema"));
    assert!(pos("wire the queries") > pos("draft the tables"));
}

/// Every dispatched task gets its own workspace, and all are released
/// by the end of a clean run.
#[tokio::test]
async fn test_workspaces_are_released_after_run() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new());
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_secs(30));
    let (graph, ..) = fan_out_graph();
    let graph = Arc::new(RwLock::new(graph));

    coordinator
        .execute(Arc::clone(&graph), ExecutionPolicy::default())
        .await
        .unwrap();

    let leftover: Vec<_> = std::fs::read_dir(repo.worktrees_dir())
        .map(|entries| entries.flatten().collect())
        .unwrap_or_default();
    assert!(
        leftover.is_empty(),
        "worktrees left behind: {:?}",
        leftover
            .iter()
            .map(|e| e.file_name())
            .collect::<Vec<_>>()
    );

    // Tasks keep a record of where they ran
    let graph = graph.read().await;
    for task in graph.all_tasks() {
        assert!(task.workspace_path.is_some());
        assert!(task
            .branch_name
            .as_deref()
            .unwrap()
            .starts_with("conductor/"));
    }
}
