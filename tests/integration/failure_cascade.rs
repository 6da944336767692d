//! Failure isolation and dependent cancellation tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use conductor::coordinator::{ExecutionMode, ExecutionPolicy};
use conductor::core::{DependencyKind, Task, TaskGraph, TaskStatus};

use crate::fixtures::{coordinator_for, MockBackend, TestRepo};

/// Given a failing root with a dependent chain and an unrelated task,
/// the chain is cancelled, the unrelated task completes, and the run
/// reports failure.
#[tokio::test]
async fn test_failure_cancels_exactly_the_dependent_subtree() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().failing_on("doomed"));
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_secs(30));

    let mut graph = TaskGraph::new();
    let bad = Task::new("bad", "backend", "doomed work");
    let child = Task::new("child", "tester", "test the doomed work");
    let grandchild = Task::new("grandchild", "reviewer", "review the tests");
    let bystander = Task::new("bystander", "docs", "write the changelog");
    let (id_bad, id_child, id_grand, id_bystander) =
        (bad.id, child.id, grandchild.id, bystander.id);
    graph.add_task(bad);
    graph.add_task(child);
    graph.add_task(grandchild);
    graph.add_task(bystander);
    graph
        .add_dependency(&id_bad, &id_child, DependencyKind::Precedence)
        .unwrap();
    graph
        .add_dependency(&id_child, &id_grand, DependencyKind::Precedence)
        .unwrap();
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(Arc::clone(&graph), ExecutionPolicy::default())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.completed, 1);

    let graph = graph.read().await;
    assert!(matches!(
        graph.get_task(&id_bad).unwrap().status,
        TaskStatus::Failed { .. }
    ));
    for id in [&id_child, &id_grand] {
        match &graph.get_task(id).unwrap().status {
            TaskStatus::Cancelled { reason } => assert_eq!(reason, "dependency failed"),
            other => panic!("expected cancelled, got {}", other),
        }
    }
    assert_eq!(
        graph.get_task(&id_bystander).unwrap().status,
        TaskStatus::Completed
    );
}

/// Sequential mode halts dispatch on the first failure, leaving
/// not-yet-dispatched independent tasks pending.
#[tokio::test]
async fn test_sequential_failure_halts_remaining_dispatch() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().failing_on("doomed"));
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_secs(30));

    let mut graph = TaskGraph::new();
    let mut bad = Task::new("bad", "backend", "doomed work");
    bad.priority = 0;
    let mut later = Task::new("later", "frontend", "later work");
    later.priority = 10;
    let id_later = later.id;
    graph.add_task(bad);
    graph.add_task(later);
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(
            Arc::clone(&graph),
            ExecutionPolicy {
                mode: ExecutionMode::Sequential,
                max_parallel: 4,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(
        graph.read().await.get_task(&id_later).unwrap().status,
        TaskStatus::Pending
    );
}

/// One failing task among independent siblings leaves the siblings
/// untouched.
#[tokio::test]
async fn test_sibling_tasks_survive_one_failure() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().failing_on("doomed"));
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_secs(30));

    let mut graph = TaskGraph::new();
    let mut completed_ids = Vec::new();
    for i in 0..3 {
        let task = Task::new(&format!("ok-{}", i), "backend", "fine work");
        completed_ids.push(task.id);
        graph.add_task(task);
    }
    graph.add_task(Task::new("bad", "backend", "doomed work"));
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(Arc::clone(&graph), ExecutionPolicy::default())
        .await
        .unwrap();

    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 1);
    let graph = graph.read().await;
    for id in &completed_ids {
        assert_eq!(graph.get_task(id).unwrap().status, TaskStatus::Completed);
    }
}

/// A worker timeout fails only its own task.
#[tokio::test]
async fn test_timeout_is_contained_to_one_task() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().hanging_on("stuck"));
    let coordinator = coordinator_for(&repo, backend, 4, Duration::from_millis(200));

    let mut graph = TaskGraph::new();
    let slow = Task::new("slow", "backend", "stuck work");
    let fine = Task::new("fine", "frontend", "quick work");
    let (id_slow, id_fine) = (slow.id, fine.id);
    graph.add_task(slow);
    graph.add_task(fine);
    let graph = Arc::new(RwLock::new(graph));

    let report = coordinator
        .execute(Arc::clone(&graph), ExecutionPolicy::default())
        .await
        .unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);
    let graph = graph.read().await;
    match &graph.get_task(&id_slow).unwrap().status {
        TaskStatus::Failed { error } => assert!(error.contains("timed out")),
        other => panic!("expected failed, got {}", other),
    }
    assert_eq!(graph.get_task(&id_fine).unwrap().status, TaskStatus::Completed);
}
