use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::agent::FileChange;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::platform::types::Issue;
use crate::workspace::{git, TrialMerge, WorktreeManager};

/// Worktrees attached to a local clone, one directory per issue.
pub struct GitWorktreeManager {
    repo_path: PathBuf,
    base_dir: PathBuf,
    token: Option<String>,
}

impl GitWorktreeManager {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            repo_path: config.workspace.repo_path.clone(),
            base_dir: config.workspace.worktree_base_dir.clone(),
            token: config.github.token.clone(),
        }
    }

    fn worktree_path(&self, issue_id: &str) -> PathBuf {
        let safe_id: String = issue_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("issue-{safe_id}"))
    }

    /// Verify a path is within the worktree (path traversal protection).
    pub fn verify_path(worktree_root: &Path, requested_path: &Path) -> Result<PathBuf> {
        if requested_path.is_absolute() {
            return Err(AppError::Workspace(format!(
                "Absolute paths are not allowed: {}",
                requested_path.display()
            )));
        }

        let full_path = worktree_root.join(requested_path);

        // New files: resolve the parent, which is created if missing
        let canonical = if full_path.exists() {
            full_path.canonicalize()
        } else {
            let parent = full_path
                .parent()
                .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;

            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Workspace(format!("Failed to create directory: {e}")))?;
            }

            let canonical_parent = parent
                .canonicalize()
                .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

            let file_name = full_path
                .file_name()
                .ok_or_else(|| AppError::Workspace("Invalid file name".to_string()))?;

            Ok(canonical_parent.join(file_name))
        }
        .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

        let canonical_root = worktree_root
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve worktree root: {e}")))?;

        if !canonical.starts_with(&canonical_root) || canonical.starts_with(canonical_root.join(".git")) {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside the worktree",
                requested_path.display()
            )));
        }

        Ok(canonical)
    }
}

#[async_trait]
impl WorktreeManager for GitWorktreeManager {
    async fn create(&self, issue: &Issue, branch: &str) -> Result<PathBuf> {
        let path = self.worktree_path(&issue.id);
        if path.exists() {
            return Err(AppError::Workspace(format!(
                "Worktree path already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to create worktree dir: {e}")))?;
        }

        git::add_worktree(&self.repo_path, &path, branch).await?;
        tracing::info!(issue = %issue.id, branch = branch, path = %path.display(), "Created worktree");
        Ok(path)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        git::remove_worktree(&self.repo_path, path).await?;
        tracing::info!(path = %path.display(), "Removed worktree");
        Ok(())
    }

    async fn apply_changes(&self, path: &Path, files: &[FileChange]) -> Result<usize> {
        for file in files {
            let target = Self::verify_path(path, Path::new(&file.path))?;
            tokio::fs::write(&target, &file.content)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to write {}: {e}", file.path)))?;
        }
        Ok(files.len())
    }

    async fn commit_and_push(&self, path: &Path, branch: &str, message: &str) -> Result<bool> {
        if !git::has_changes(path).await? {
            tracing::info!(branch = branch, "No changes to commit");
            return Ok(false);
        }

        git::add_all(path).await?;
        git::commit(path, message).await?;
        git::push(path, branch, self.token.as_deref()).await?;
        Ok(true)
    }

    async fn delete_local_branch(&self, branch: &str) -> Result<()> {
        git::delete_branch(&self.repo_path, branch).await
    }

    async fn trial_merge(&self, path: &Path, base: &str) -> Result<TrialMerge> {
        git::trial_merge(path, base).await
    }
}
