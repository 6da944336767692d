//! Isolated per-task workspaces backed by git worktrees.
//!
//! Each task executes in its own checkout on a fresh branch, so
//! concurrent workers never share a working directory. Creation is
//! strict (a per-task error); destruction is best-effort.

use crate::core::TaskId;
use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::{clog_debug, clog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// An isolated checkout owned by exactly one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
    pub session_id: String,
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
}

/// Creates and tears down per-task worktrees under a common directory.
pub struct WorkspaceIsolator {
    git: GitOps,
    worktrees_dir: PathBuf,
    active: HashMap<TaskId, Workspace>,
}

impl WorkspaceIsolator {
    pub fn new(repo_path: &Path, worktrees_dir: PathBuf) -> Result<Self> {
        let git = GitOps::new(repo_path)?;
        std::fs::create_dir_all(&worktrees_dir)?;
        Ok(Self {
            git,
            worktrees_dir,
            active: HashMap::new(),
        })
    }

    /// Create an isolated workspace for a task.
    ///
    /// The worktree name carries the task ID plus a random suffix, so
    /// retries after a failed destroy never collide.
    ///
    /// # Errors
    /// Failures are wrapped in a task-scoped `Error::Workspace`; a
    /// sibling task's workspace is never affected.
    pub fn create(&mut self, session_id: &str, task_id: &TaskId) -> Result<Workspace> {
        let suffix = Uuid::new_v4().to_string()[..6].to_string();
        let name = format!("task-{}-{}", task_id.short(), suffix);
        let branch = format!("conductor/{}", name);
        let path = self.worktrees_dir.join(&name);
        clog_debug!(
            "WorkspaceIsolator::create task={} session={} path={}",
            task_id.short(),
            session_id,
            path.display()
        );

        self.git
            .create_worktree(&branch, &path)
            .map_err(|e| Error::Workspace {
                task_id: task_id.to_string(),
                message: format!("worktree creation failed: {}", e),
            })?;

        let workspace = Workspace {
            path,
            branch,
            session_id: session_id.to_string(),
            task_id: *task_id,
            created_at: Utc::now(),
        };
        self.active.insert(*task_id, workspace.clone());
        Ok(workspace)
    }

    /// Destroy a task's workspace.
    ///
    /// Best-effort: removal and branch-deletion failures are logged and
    /// the tracking entry is dropped regardless, so a stuck worktree
    /// never wedges the run.
    pub fn destroy(&mut self, task_id: &TaskId) {
        let Some(workspace) = self.active.remove(task_id) else {
            clog_debug!(
                "WorkspaceIsolator::destroy no workspace tracked for task {}",
                task_id.short()
            );
            return;
        };
        clog_debug!(
            "WorkspaceIsolator::destroy task={} path={}",
            task_id.short(),
            workspace.path.display()
        );

        if let Err(e) = self.git.remove_worktree(&workspace.path) {
            clog_warn!(
                "Failed to remove worktree {}: {}",
                workspace.path.display(),
                e
            );
        }
        if let Err(e) = self.git.delete_branch(&workspace.branch) {
            clog_warn!("Failed to delete branch {}: {}", workspace.branch, e);
        }
    }

    /// Destroy every tracked workspace and prune stale worktree records.
    pub fn destroy_all(&mut self) {
        let task_ids: Vec<TaskId> = self.active.keys().copied().collect();
        for task_id in task_ids {
            self.destroy(&task_id);
        }
        if let Ok(pruned) = self.git.prune_stale_worktrees() {
            if pruned > 0 {
                clog_debug!("Pruned {} stale worktree entries", pruned);
            }
        }
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&Workspace> {
        self.active.get(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
