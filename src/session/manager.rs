//! Worker session registry and lifecycle.
//!
//! A session owns at most one running worker process at a time. The
//! manager enforces the Idle -> Busy -> Idle|Error -> Terminated state
//! machine, bounds the pool, and runs a heartbeat monitor that
//! force-terminates sessions whose worker has gone silent. The backend
//! timeout is the primary bound; the monitor is the second safety net.

use crate::backend::{Heartbeat, WorkerBackend};
use crate::core::TaskId;
use crate::error::{Error, Result};
use crate::workspace::Workspace;
use crate::{clog, clog_debug, clog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle state.
///
/// Terminated is terminal; Error sessions stay registered (visible in
/// statistics) until terminated, and are never handed new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Busy,
    Error,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Busy => write!(f, "busy"),
            SessionState::Error => write!(f, "error"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// One registered worker session.
pub struct WorkerSession {
    pub id: SessionId,
    pub role: String,
    pub state: SessionState,
    pub workspace: Option<Workspace>,
    pub current_task_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub heartbeat: Heartbeat,
    /// Cancelled to force-terminate a running execution.
    cancel: CancellationToken,
}

/// Outcome of one task execution through a session.
///
/// Every failure mode (spawn, nonzero exit, timeout, forced
/// termination) resolves here with `success: false`; `execute_task`
/// only errors on misuse of the session itself.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Aggregate session counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_spawned: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub timed_out: usize,
    pub busy: usize,
    pub idle: usize,
    pub errored: usize,
    pub terminated: usize,
}

struct Counters {
    total_spawned: usize,
    tasks_completed: usize,
    tasks_failed: usize,
    timed_out: usize,
}

/// Registry of worker sessions sharing one backend.
#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn WorkerBackend>,
    sessions: Arc<RwLock<HashMap<SessionId, WorkerSession>>>,
    counters: Arc<RwLock<Counters>>,
    max_sessions: usize,
    task_timeout: Duration,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn WorkerBackend>, max_sessions: usize, task_timeout: Duration) -> Self {
        Self {
            backend,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(Counters {
                total_spawned: 0,
                tasks_completed: 0,
                tasks_failed: 0,
                timed_out: 0,
            })),
            max_sessions,
            task_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Register a new idle session for the given role.
    ///
    /// # Errors
    /// Returns `Error::SessionPoolFull` when the count of live
    /// (non-terminated) sessions has reached the bound. The bound is
    /// hard; there is no queue.
    pub async fn create_session(&self, role: &str) -> Result<SessionId> {
        let mut sessions = self.sessions.write().await;
        let live = sessions
            .values()
            .filter(|s| s.state != SessionState::Terminated)
            .count();
        if live >= self.max_sessions {
            return Err(Error::SessionPoolFull {
                max: self.max_sessions,
            });
        }

        let session = WorkerSession {
            id: SessionId::new(),
            role: role.to_string(),
            state: SessionState::Idle,
            workspace: None,
            current_task_id: None,
            created_at: Utc::now(),
            heartbeat: Heartbeat::new(),
            cancel: CancellationToken::new(),
        };
        let id = session.id;
        clog_debug!("SessionManager: created session {} role={}", id.short(), role);
        sessions.insert(id, session);
        self.counters.write().await.total_spawned += 1;
        Ok(id)
    }

    /// Bind a workspace to a session. One session per workspace.
    pub async fn assign_workspace(&self, session_id: &SessionId, workspace: Workspace) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session.workspace = Some(workspace);
        Ok(())
    }

    /// Execute a task through a session.
    ///
    /// The session must be Idle; anything else is a caller error. The
    /// session is Busy for the duration, then Idle on success or Error
    /// on any failure. Forced termination mid-flight (monitor or
    /// `terminate_session`) resolves as a failed outcome.
    pub async fn execute_task(
        &self,
        session_id: &SessionId,
        task_id: &TaskId,
        prompt: &str,
    ) -> Result<TaskOutcome> {
        let (heartbeat, cancel, workdir) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
            if session.state != SessionState::Idle {
                return Err(Error::SessionNotIdle {
                    id: session_id.short(),
                    state: session.state.to_string(),
                });
            }
            let Some(workspace) = session.workspace.clone() else {
                session.state = SessionState::Error;
                self.counters.write().await.tasks_failed += 1;
                return Ok(TaskOutcome {
                    task_id: *task_id,
                    session_id: *session_id,
                    success: false,
                    output: String::new(),
                    error: Some("session has no workspace".to_string()),
                    timed_out: false,
                    duration: Duration::ZERO,
                });
            };
            session.state = SessionState::Busy;
            session.current_task_id = Some(*task_id);
            session.heartbeat.beat();
            (
                session.heartbeat.clone(),
                session.cancel.clone(),
                workspace.path,
            )
        };

        clog!(
            "Session {} executing task {}",
            session_id.short(),
            task_id.short()
        );
        let started = std::time::Instant::now();
        // Dropping the backend future kills the child (kill_on_drop)
        let result = tokio::select! {
            res = self.backend.execute(prompt, &workdir, self.task_timeout, &heartbeat) => Some(res),
            _ = cancel.cancelled() => None,
        };

        let outcome = match result {
            Some(Ok(raw)) => TaskOutcome {
                task_id: *task_id,
                session_id: *session_id,
                success: raw.success,
                output: raw.output,
                error: raw.error,
                timed_out: raw.timed_out,
                duration: raw.duration,
            },
            Some(Err(e)) => TaskOutcome {
                task_id: *task_id,
                session_id: *session_id,
                success: false,
                output: String::new(),
                error: Some(e.to_string()),
                timed_out: false,
                duration: started.elapsed(),
            },
            None => TaskOutcome {
                task_id: *task_id,
                session_id: *session_id,
                success: false,
                output: String::new(),
                error: Some("session terminated while running".to_string()),
                timed_out: true,
                duration: started.elapsed(),
            },
        };

        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(session_id) {
                session.current_task_id = None;
                // A termination that raced us already set the final state
                if session.state == SessionState::Busy {
                    session.state = if outcome.success {
                        SessionState::Idle
                    } else {
                        SessionState::Error
                    };
                }
            }
        }
        {
            let mut counters = self.counters.write().await;
            if outcome.success {
                counters.tasks_completed += 1;
            } else {
                counters.tasks_failed += 1;
                if outcome.timed_out {
                    counters.timed_out += 1;
                }
            }
        }
        if !outcome.success {
            clog_warn!(
                "Session {} task {} failed: {}",
                session_id.short(),
                task_id.short(),
                outcome.error.as_deref().unwrap_or("unknown")
            );
        }
        Ok(outcome)
    }

    /// Force-terminate a session.
    ///
    /// Cancels any in-flight execution (killing the worker process) and
    /// marks the session Terminated. Idempotent.
    pub async fn terminate_session(&self, session_id: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if session.state == SessionState::Terminated {
            return Ok(());
        }
        clog!(
            "Terminating session {} (was {})",
            session_id.short(),
            session.state
        );
        session.cancel.cancel();
        session.state = SessionState::Terminated;
        Ok(())
    }

    /// Terminate every live session.
    pub async fn terminate_all(&self) {
        let ids: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.state != SessionState::Terminated)
                .map(|s| s.id)
                .collect()
        };
        for id in ids {
            let _ = self.terminate_session(&id).await;
        }
    }

    pub async fn session_state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.read().await.get(session_id).map(|s| s.state)
    }

    pub async fn busy_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.state == SessionState::Busy)
            .count()
    }

    /// Aggregate counters plus a live state census.
    pub async fn statistics(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let counters = self.counters.read().await;
        let count = |state: SessionState| sessions.values().filter(|s| s.state == state).count();
        SessionStats {
            total_spawned: counters.total_spawned,
            tasks_completed: counters.tasks_completed,
            tasks_failed: counters.tasks_failed,
            timed_out: counters.timed_out,
            busy: count(SessionState::Busy),
            idle: count(SessionState::Idle),
            errored: count(SessionState::Error),
            terminated: count(SessionState::Terminated),
        }
    }

    /// Start the heartbeat monitor.
    ///
    /// Every `interval` it scans Busy sessions and force-terminates any
    /// whose last output is older than `stale_after`. Runs until
    /// `shutdown` is called.
    pub fn spawn_heartbeat_monitor(
        &self,
        interval: Duration,
        stale_after: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.cancelled() => break,
                }
                let mut sessions = sessions.write().await;
                for session in sessions.values_mut() {
                    if session.state == SessionState::Busy
                        && session.heartbeat.elapsed() > stale_after
                    {
                        clog_warn!(
                            "Heartbeat monitor: session {} silent for {:?}, terminating",
                            session.id.short(),
                            session.heartbeat.elapsed()
                        );
                        session.cancel.cancel();
                        session.state = SessionState::Terminated;
                    }
                }
            }
        })
    }

    /// Stop the heartbeat monitor.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
