pub mod github;
pub mod timed;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// The code host a pull request lives on.
///
/// Implementations classify failures into [`AppError`](crate::error::AppError)
/// variants so callers can tell transient errors from terminal ones.
#[async_trait]
pub trait SourceControlHost: Send + Sync {
    /// Fetch a pull request.
    async fn get_pull_request(&self, pr: u64) -> Result<PullRequest>;

    /// Fetch the unified diff of a pull request.
    async fn get_diff(&self, pr: u64) -> Result<String>;

    /// Fetch all reviews on a PR, oldest first.
    async fn get_reviews(&self, pr: u64) -> Result<Vec<HostReview>>;

    /// Fetch all line comments on a PR, oldest first.
    async fn get_comments(&self, pr: u64) -> Result<Vec<ReviewComment>>;

    /// Post a comment-only review with optional line comments.
    async fn post_review(&self, pr: u64, body: &str, comments: &[NewReviewComment]) -> Result<()>;

    /// Fetch status checks and check runs reported on the PR head.
    async fn get_status_checks(&self, pr: u64) -> Result<Vec<StatusCheck>>;

    /// Fetch protection rules for a branch. `None` when unprotected.
    async fn get_branch_protection(&self, branch: &str) -> Result<Option<BranchProtection>>;

    /// Merge a PR. Conflicts are reported as [`MergeResponse::Conflict`],
    /// everything else that prevents the merge is an error.
    async fn merge(&self, pr: u64, method: MergeMethod) -> Result<MergeResponse>;

    /// Delete a remote branch.
    async fn delete_branch(&self, branch: &str) -> Result<()>;
}

/// Where the issues that workflows are keyed by come from.
#[async_trait]
pub trait IssueProvider: Send + Sync {
    /// Fetch an issue.
    async fn fetch(&self, issue_id: &str) -> Result<Issue>;

    /// Close an issue, leaving a comment.
    async fn close(&self, issue_id: &str, comment: &str) -> Result<()>;
}
