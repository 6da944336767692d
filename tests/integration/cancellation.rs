//! Mid-run cancellation tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use conductor::coordinator::{ExecutionMode, ExecutionPolicy};
use conductor::core::{TaskGraph, TaskStatus};

use crate::fixtures::{coordinator_for, independent_tasks, MockBackend, TestRepo};

/// Cancelling a run drives every non-terminal task to Cancelled and
/// releases all workspaces.
#[tokio::test]
async fn test_cancel_mid_run() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_secs(30)));
    let coordinator = Arc::new(coordinator_for(&repo, backend, 4, Duration::from_secs(60)));

    let mut graph = TaskGraph::new();
    for task in independent_tasks(4) {
        graph.add_task(task);
    }
    let graph = Arc::new(RwLock::new(graph));

    let runner = {
        let coordinator = Arc::clone(&coordinator);
        let graph = Arc::clone(&graph);
        tokio::spawn(async move {
            coordinator
                .execute(
                    graph,
                    ExecutionPolicy {
                        mode: ExecutionMode::Parallel,
                        max_parallel: 4,
                    },
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    coordinator.cancel();

    let report = runner.await.unwrap().unwrap();
    assert!(!report.success);
    assert_eq!(report.completed, 0);

    let graph = graph.read().await;
    assert!(graph.all_terminal());
    for task in graph.all_tasks() {
        assert!(
            matches!(
                task.status,
                TaskStatus::Cancelled { .. } | TaskStatus::Failed { .. }
            ),
            "task {} ended as {}",
            task.title,
            task.status
        );
    }

    let leftover: Vec<_> = std::fs::read_dir(repo.worktrees_dir())
        .map(|entries| entries.flatten().collect())
        .unwrap_or_default();
    assert!(leftover.is_empty(), "worktrees not released on cancel");
}

/// Tasks that completed before the cancel keep their results.
#[tokio::test]
async fn test_cancel_preserves_completed_results() {
    let repo = TestRepo::new();
    // The hanging task never beats; the quick ones settle first.
    let backend = Arc::new(
        MockBackend::new()
            .with_delay(Duration::from_millis(10))
            .hanging_on("stuck"),
    );
    let coordinator = Arc::new(coordinator_for(&repo, backend, 4, Duration::from_secs(60)));

    let mut graph = TaskGraph::new();
    let quick = conductor::core::Task::new("quick", "backend", "quick work");
    let slow = conductor::core::Task::new("slow", "backend", "stuck work");
    let (id_quick, id_slow) = (quick.id, slow.id);
    graph.add_task(quick);
    graph.add_task(slow);
    let graph = Arc::new(RwLock::new(graph));

    let runner = {
        let coordinator = Arc::clone(&coordinator);
        let graph = Arc::clone(&graph);
        tokio::spawn(async move { coordinator.execute(graph, ExecutionPolicy::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    coordinator.cancel();

    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.completed, 1);
    assert!(report.results.contains_key(&id_quick));

    let graph = graph.read().await;
    assert_eq!(graph.get_task(&id_quick).unwrap().status, TaskStatus::Completed);
    assert!(matches!(
        graph.get_task(&id_slow).unwrap().status,
        TaskStatus::Cancelled { .. } | TaskStatus::Failed { .. }
    ));
}

/// Cancelling after the run settled is a no-op at the graph level.
#[tokio::test]
async fn test_cancel_after_completion_is_harmless() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new());
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_secs(30));

    let mut graph = TaskGraph::new();
    for task in independent_tasks(2) {
        graph.add_task(task);
    }
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(Arc::clone(&graph), ExecutionPolicy::default())
        .await
        .unwrap();
    assert!(report.success);

    coordinator.cancel();

    let graph = graph.read().await;
    for task in graph.all_tasks() {
        assert_eq!(task.status, TaskStatus::Completed);
    }
}
