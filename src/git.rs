use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository};

use crate::{clog_debug, clog_warn, Result};

/// Thin wrapper over git2 for worktree-based workspace isolation.
pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        clog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    /// Create a worktree on a fresh branch cut from HEAD.
    pub fn create_worktree(&self, branch: &str, worktree_path: &Path) -> Result<()> {
        clog_debug!(
            "GitOps::create_worktree branch={} path={}",
            branch,
            worktree_path.display()
        );
        let repo = self.repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        let branch_obj = repo.branch(branch, &commit, false)?;
        let branch_ref = branch_obj.into_reference();
        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        // The worktree name comes from the folder, since the branch may
        // contain slashes.
        let worktree_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        repo.worktree(worktree_name, worktree_path, Some(&opts))?;
        clog_debug!("Worktree created: {}", worktree_name);
        Ok(())
    }

    /// Remove a worktree and its administrative state.
    ///
    /// Cleanup continues past individual failures. The admin directory
    /// under .git/worktrees must go too, otherwise git considers the
    /// branch still checked out.
    pub fn remove_worktree(&self, worktree_path: &Path) -> Result<()> {
        clog_debug!("GitOps::remove_worktree path={}", worktree_path.display());
        let repo = self.repo()?;
        let worktrees = repo.worktrees()?;

        let folder_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        let worktree_name: Option<String> = worktrees
            .iter()
            .flatten()
            .find(|name| {
                repo.find_worktree(name)
                    .map(|wt| wt.path() == worktree_path)
                    .unwrap_or(false)
            })
            .map(|s| s.to_string())
            .or_else(|| {
                folder_name.as_ref().and_then(|fname| {
                    worktrees
                        .iter()
                        .flatten()
                        .find(|name| *name == fname.as_str())
                        .map(|s| s.to_string())
                })
            });

        if let Some(ref name) = worktree_name {
            if let Ok(worktree) = repo.find_worktree(name) {
                let _ = worktree.unlock();
                let prune_result = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                ));
                if let Err(e) = prune_result {
                    clog_warn!("Worktree prune failed for '{}': {}", name, e);
                }
            }
        }

        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)?;
        }

        if let Some(ref name) = worktree_name {
            self.cleanup_worktree_admin_dir(name);
        }
        if let Some(ref fname) = folder_name {
            self.cleanup_worktree_admin_dir(fname);
        }

        clog_debug!("Worktree removed: {}", worktree_path.display());
        Ok(())
    }

    /// Remove .git/worktrees/<name> if it is still around.
    fn cleanup_worktree_admin_dir(&self, worktree_name: &str) {
        if let Ok(repo) = self.repo() {
            let admin_dir = repo.path().join("worktrees").join(worktree_name);
            if admin_dir.exists() {
                clog_debug!("Cleaning up worktree admin dir: {}", admin_dir.display());
                let _ = std::fs::remove_dir_all(&admin_dir);
            }
        }
    }

    /// Prune worktree entries whose directories no longer exist.
    pub fn prune_stale_worktrees(&self) -> Result<usize> {
        let repo = self.repo()?;
        let worktrees = repo.worktrees()?;

        let mut pruned = 0;
        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = repo.find_worktree(name) {
                if !worktree.path().exists()
                    && worktree
                        .prune(Some(
                            git2::WorktreePruneOptions::new()
                                .valid(true)
                                .working_tree(true)
                                .locked(true),
                        ))
                        .is_ok()
                {
                    clog_debug!("Pruned stale worktree reference: {}", name);
                    pruned += 1;
                }
            }
        }
        Ok(pruned)
    }

    /// Delete a local branch. Missing branches are fine; other failures
    /// are logged rather than propagated, since the worktree removal is
    /// what matters.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        clog_debug!("GitOps::delete_branch branch={}", branch);
        let repo = self.repo()?;
        match repo.find_branch(branch, git2::BranchType::Local) {
            Ok(mut branch_ref) => {
                if let Err(e) = branch_ref.delete() {
                    clog_warn!("Failed to delete branch '{}': {}", branch, e);
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {}
            Err(e) => {
                clog_warn!("Error looking up branch '{}': {}", branch, e);
            }
        }
        Ok(())
    }
}
