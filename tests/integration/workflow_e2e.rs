//! Full orchestrator runs: request in, settled graph out.

use std::sync::Arc;
use std::time::Duration;

use conductor::coordinator::ExecutionEvent;
use conductor::orchestrator::{ExecutionOptions, Orchestrator, Phase};
use conductor::Config;

use crate::fixtures::{MockBackend, TestRepo};

fn orchestrator_for(repo: &TestRepo, backend: Arc<MockBackend>) -> Orchestrator {
    Orchestrator::with_backend(
        &repo.path,
        Config::default(),
        backend,
        repo.worktrees_dir(),
    )
}

/// A multi-concern request plans several roles and completes them all.
#[tokio::test]
async fn test_request_to_completed_run() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new());
    let orchestrator = orchestrator_for(&repo, Arc::clone(&backend));

    let result = orchestrator
        .execute(
            "build the backend api and the frontend ui with tests",
            &ExecutionOptions::default(),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.task_count > 1);
    assert_eq!(result.completed, result.task_count);
    assert_eq!(result.results.len(), result.task_count);
    assert_eq!(backend.recorded_prompts().len(), result.task_count);
    assert_eq!(result.session_stats.tasks_completed, result.task_count);
    assert_eq!(result.session_stats.tasks_failed, 0);
}

/// "Created:" marker lines become artifacts, each exactly once even
/// when the line is repeated.
#[tokio::test]
async fn test_created_marker_extracted_once() {
    let repo = TestRepo::new();
    let backend = Arc::new(
        MockBackend::new()
            .with_output("Created: src/foo.ts\nCreated: src/foo.ts\n\n## Summary\nadded foo\n"),
    );
    let orchestrator = orchestrator_for(&repo, backend);

    let result = orchestrator
        .execute(
            "write documentation",
            &ExecutionOptions {
                max_nodes: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    let parsed = result.results.values().next().unwrap();
    assert_eq!(parsed.artifacts, vec!["src/foo.ts".to_string()]);
    assert_eq!(parsed.summary, "added foo");
}

/// max_nodes=1 collapses any request to a single task.
#[tokio::test]
async fn test_single_node_budget_yields_one_task() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new());
    let orchestrator = orchestrator_for(&repo, Arc::clone(&backend));

    let result = orchestrator
        .execute(
            "build the backend api, frontend ui, database schema, tests and docs",
            &ExecutionOptions {
                max_nodes: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.task_count, 1);
    assert_eq!(backend.recorded_prompts().len(), 1);
}

/// Progress events arrive in lifecycle order and end with a finish.
#[tokio::test]
async fn test_progress_events_stream() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new());
    let orchestrator = orchestrator_for(&repo, backend);
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);

    let result = orchestrator
        .execute_with_events(
            "write documentation",
            &ExecutionOptions::default(),
            tx,
        )
        .await
        .unwrap();
    assert!(result.success);

    let mut started = 0;
    let mut completed = 0;
    let mut finished = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            ExecutionEvent::TaskStarted { .. } => {
                assert!(!finished, "start after finish");
                started += 1;
            }
            ExecutionEvent::TaskCompleted { quality, .. } => {
                assert!((0.0..=1.0).contains(&quality));
                completed += 1;
            }
            ExecutionEvent::ExecutionFinished {
                completed: done, ..
            } => {
                finished = true;
                assert_eq!(done, result.completed);
            }
            _ => {}
        }
    }
    assert_eq!(started, result.task_count);
    assert_eq!(completed, result.task_count);
    assert!(finished);
}

/// Cancelling through the facade flips the run's phase and settles
/// every task.
#[tokio::test]
async fn test_cancel_through_orchestrator() {
    let repo = TestRepo::new();
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_secs(30)));
    let orchestrator = Arc::new(orchestrator_for(&repo, backend));
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);

    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .execute_with_events(
                    "write documentation",
                    &ExecutionOptions::default(),
                    tx,
                )
                .await
        })
    };

    // Wait until the first task is actually running
    loop {
        match rx.recv().await.expect("run produced no events") {
            ExecutionEvent::TaskStarted { .. } => break,
            _ => continue,
        }
    }
    let sessions = orchestrator.active_sessions().await;
    assert_eq!(sessions.len(), 1);
    let session_id = sessions.into_iter().next().unwrap();

    assert!(orchestrator.cancel(&session_id).await);
    let result = runner.await.unwrap().unwrap();

    assert!(!result.success);
    assert_eq!(result.completed, 0);
    let progress = orchestrator.progress(&session_id).await.unwrap();
    assert_eq!(progress.phase, Phase::Cancelled);
    assert!(progress.running.is_empty());

    // A finished run can no longer be cancelled
    assert!(!orchestrator.cancel(&session_id).await);
}
