use std::sync::Arc;

use chrono::Utc;

use crate::config::CleanupConfig;
use crate::error::Result;
use crate::platform::{IssueProvider, SourceControlHost};
use crate::state::{CleanupRecord, WorkflowState, WorkflowStateStore, WorkflowStatus};
use crate::workspace::WorktreeManager;

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub records: Vec<CleanupRecord>,
}

impl CleanupReport {
    pub fn all_succeeded(&self) -> bool {
        self.records.iter().all(|r| r.success)
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.step.as_str())
            .collect()
    }

    fn record<T>(&mut self, step: &str, issue_id: &str, outcome: Result<T>) -> Option<T> {
        match outcome {
            Ok(value) => {
                tracing::info!(issue = %issue_id, step = step, "Cleanup step done");
                self.records.push(CleanupRecord {
                    step: step.to_string(),
                    success: true,
                    message: None,
                });
                Some(value)
            }
            Err(e) => {
                tracing::warn!(issue = %issue_id, step = step, error = %e, "Cleanup step failed");
                self.records.push(CleanupRecord {
                    step: step.to_string(),
                    success: false,
                    message: Some(e.to_string()),
                });
                None
            }
        }
    }
}

/// Best-effort teardown after a merge. Step failures are logged and recorded,
/// never propagated: the merge has already happened.
pub struct PostMergeCleanupCoordinator {
    config: CleanupConfig,
    retention: Option<chrono::Duration>,
    store: WorkflowStateStore,
    host: Arc<dyn SourceControlHost>,
    issues: Arc<dyn IssueProvider>,
    worktrees: Arc<dyn WorktreeManager>,
}

impl PostMergeCleanupCoordinator {
    pub fn new(
        config: CleanupConfig,
        retention: Option<chrono::Duration>,
        store: WorkflowStateStore,
        host: Arc<dyn SourceControlHost>,
        issues: Arc<dyn IssueProvider>,
        worktrees: Arc<dyn WorktreeManager>,
    ) -> Self {
        Self {
            config,
            retention,
            store,
            host,
            issues,
            worktrees,
        }
    }

    /// Run every configured step in order. The caller holds the state lock.
    ///
    /// The local branch goes after the worktree: git refuses to delete a
    /// branch that is still checked out.
    pub async fn run(&self, state: &mut WorkflowState) -> CleanupReport {
        let mut report = CleanupReport::default();
        let issue_id = state.issue_id.clone();

        if self.config.close_issue {
            let sha = state
                .merge
                .as_ref()
                .and_then(|m| m.commit_sha.as_deref())
                .map(|sha| format!(" as {sha}"))
                .unwrap_or_default();
            let comment = format!("Resolved by pull request #{}, merged{sha}.", state.pr_number);
            report.record("close_issue", &issue_id, self.issues.close(&issue_id, &comment).await);
        }

        if self.config.delete_remote_branch {
            report.record(
                "delete_remote_branch",
                &issue_id,
                self.host.delete_branch(&state.branch).await,
            );
        }

        if self.config.remove_worktree {
            if let Some(path) = &state.worktree_path {
                if report.record("remove_worktree", &issue_id, self.worktrees.remove(path).await).is_some() {
                    state.worktree_path = None;
                }
            }
        }

        if self.config.delete_local_branch {
            report.record(
                "delete_local_branch",
                &issue_id,
                self.worktrees.delete_local_branch(&state.branch).await,
            );
        }

        let completed = state.transition_to(WorkflowStatus::Completed).and_then(|()| {
            state.updated_at = Utc::now();
            state.cleanup = report.records.clone();
            self.store.save(state)
        });
        report.record("mark_completed", &issue_id, completed);

        if self.config.purge_completed {
            if let Some(retention) = self.retention {
                let purged = report.record(
                    "purge_completed",
                    &issue_id,
                    self.store.purge_completed(retention, Utc::now()),
                );
                if let Some(purged) = purged.filter(|p| !p.is_empty()) {
                    tracing::info!(count = purged.len(), "Purged old completed workflows");
                }
            }
        }

        state.cleanup = report.records.clone();
        report
    }
}
