pub mod git;
pub mod manager;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::agent::FileChange;
use crate::error::Result;
use crate::platform::types::Issue;

pub use manager::GitWorktreeManager;

/// Result of merging the PR branch with its base locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialMerge {
    /// Porcelain-style status lines, one per conflicting path.
    pub lines: Vec<String>,
    /// Conflicting file contents rendered with conflict markers, by path.
    pub contents: HashMap<String, String>,
}

impl TrialMerge {
    pub fn output(&self) -> String {
        self.lines.join("\n")
    }
}

/// Per-issue working copies of the PR branch.
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    /// Create a worktree for an issue on `branch`. Returns its path.
    async fn create(&self, issue: &Issue, branch: &str) -> Result<PathBuf>;

    /// Remove a worktree.
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Write agent-produced files into the worktree. Returns how many were written.
    async fn apply_changes(&self, path: &Path, files: &[FileChange]) -> Result<usize>;

    /// Commit everything and push the branch. `false` when there was nothing to commit.
    async fn commit_and_push(&self, path: &Path, branch: &str, message: &str) -> Result<bool>;

    /// Delete the local branch once its worktree is gone.
    async fn delete_local_branch(&self, branch: &str) -> Result<()>;

    /// Merge the worktree HEAD with `base` in memory and report conflicts.
    async fn trial_merge(&self, path: &Path, base: &str) -> Result<TrialMerge>;
}
