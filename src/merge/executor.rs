use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentContext;
use crate::error::{AppError, Result};
use crate::merge::conflict::{ConflictAnalyzer, ConflictReport};
use crate::platform::types::{MergeMethod, MergeResponse, PullRequest};
use crate::platform::SourceControlHost;
use crate::state::MergeSummary;
use crate::workspace::WorktreeManager;

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub success: bool,
    pub commit_sha: Option<String>,
    pub method: MergeMethod,
    pub conflict_details: Option<ConflictReport>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl MergeResult {
    pub fn is_conflict(&self) -> bool {
        self.conflict_details.is_some()
    }

    pub fn summary(&self) -> MergeSummary {
        MergeSummary {
            success: self.success,
            method: self.method.to_string(),
            commit_sha: self.commit_sha.clone(),
            retry_count: self.retry_count,
            conflict_files: self
                .conflict_details
                .as_ref()
                .map(ConflictReport::files)
                .unwrap_or_default(),
            error: self.error.clone(),
        }
    }
}

/// A plausible abbreviated or full git object id.
pub fn is_valid_sha(sha: &str) -> bool {
    (7..=40).contains(&sha.len()) && sha.chars().all(|c| c.is_ascii_hexdigit())
}

/// Executes an already-gated merge.
///
/// Outcomes:
/// - merged: `success`, with the commit sha when one could be trusted
/// - conflict: `conflict_details` set, nothing retried
/// - non-recoverable host refusal: `error` set, nothing retried
/// - transient errors past the retry budget: returned as `Err`
pub struct MergeExecutor {
    host: Arc<dyn SourceControlHost>,
    worktrees: Option<Arc<dyn WorktreeManager>>,
    analyzer: ConflictAnalyzer,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl MergeExecutor {
    pub fn new(
        host: Arc<dyn SourceControlHost>,
        worktrees: Option<Arc<dyn WorktreeManager>>,
        analyzer: ConflictAnalyzer,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            host,
            worktrees,
            analyzer,
            retry_attempts,
            retry_delay,
        }
    }

    pub async fn execute(&self, pr: &PullRequest, method: MergeMethod, worktree: Option<&Path>) -> Result<MergeResult> {
        let mut retry_count = 0;

        loop {
            let outcome = self.host.merge(pr.number, method).await;
            match outcome {
                Ok(MergeResponse::Merged { sha, message }) => {
                    let commit_sha = self.resolve_sha(pr.number, sha).await;
                    tracing::info!(
                        pr = pr.number,
                        method = %method,
                        sha = commit_sha.as_deref().unwrap_or("unknown"),
                        retries = retry_count,
                        message = %message,
                        "Merged pull request"
                    );
                    return Ok(MergeResult {
                        success: true,
                        commit_sha,
                        method,
                        conflict_details: None,
                        error: None,
                        retry_count,
                    });
                }
                Ok(MergeResponse::Conflict { output }) => {
                    return Ok(self.conflict_result(pr, method, &output, worktree, retry_count).await);
                }
                Err(AppError::ConflictDetected(output)) => {
                    return Ok(self.conflict_result(pr, method, &output, worktree, retry_count).await);
                }
                Err(e) if e.is_transient() => {
                    if retry_count >= self.retry_attempts {
                        tracing::warn!(pr = pr.number, retries = retry_count, error = %e, "Merge retries exhausted");
                        return Err(e);
                    }
                    retry_count += 1;
                    tracing::warn!(
                        pr = pr.number,
                        attempt = retry_count,
                        max = self.retry_attempts,
                        error = %e,
                        "Transient merge failure, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e @ (AppError::NonRecoverableHost(_) | AppError::Host { .. })) => {
                    tracing::error!(pr = pr.number, error = %e, "Merge refused by host");
                    return Ok(MergeResult {
                        success: false,
                        commit_sha: None,
                        method,
                        conflict_details: None,
                        error: Some(e.to_string()),
                        retry_count,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Trust the primary sha only if it looks like one; otherwise read the
    /// PR once more. Failure here never fails the merge.
    async fn resolve_sha(&self, pr_number: u64, primary: Option<String>) -> Option<String> {
        if let Some(sha) = primary.filter(|s| is_valid_sha(s)) {
            return Some(sha);
        }

        match self.host.get_pull_request(pr_number).await {
            Ok(pr) => {
                let sha = pr.merge_commit_sha.filter(|s| is_valid_sha(s));
                if sha.is_none() {
                    tracing::warn!(pr = pr_number, "Merge commit sha unavailable");
                }
                sha
            }
            Err(e) => {
                tracing::warn!(pr = pr_number, error = %e, "Failed to read merge commit sha");
                None
            }
        }
    }

    async fn conflict_result(
        &self,
        pr: &PullRequest,
        method: MergeMethod,
        host_output: &str,
        worktree: Option<&Path>,
        retry_count: u32,
    ) -> MergeResult {
        let (output, contents) = self.conflict_input(pr, host_output, worktree).await;
        let details = self.analyzer.analyze(&output, &contents);
        let context = AgentContext {
            pr_number: Some(pr.number),
            working_dir: worktree.map(Path::to_path_buf),
        };
        let report = self.analyzer.report(details, &context).await;

        tracing::warn!(
            pr = pr.number,
            files = report.conflicts.len(),
            estimated_minutes = report.estimated_minutes,
            "Merge blocked by conflicts"
        );
        MergeResult {
            success: false,
            commit_sha: None,
            method,
            error: Some(format!(
                "Merge conflicts in {} file(s): {}",
                report.conflicts.len(),
                report.files().join(", ")
            )),
            conflict_details: Some(report),
            retry_count,
        }
    }

    /// Prefer a local trial merge, which carries file contents, over host output.
    async fn conflict_input(
        &self,
        pr: &PullRequest,
        host_output: &str,
        worktree: Option<&Path>,
    ) -> (String, HashMap<String, String>) {
        if let (Some(manager), Some(path)) = (&self.worktrees, worktree) {
            match manager.trial_merge(path, &pr.base_branch).await {
                Ok(trial) if !trial.lines.is_empty() => return (trial.output(), trial.contents),
                Ok(_) => {}
                Err(e) => tracing::warn!(pr = pr.number, error = %e, "Local trial merge failed"),
            }
        }
        (host_output.to_string(), HashMap::new())
    }
}
