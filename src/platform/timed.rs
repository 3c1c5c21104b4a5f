use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::{IssueProvider, SourceControlHost};

/// Bounds every call on the wrapped host or issue tracker. A call that runs
/// past the limit is a transient failure.
pub struct Timed<T: ?Sized> {
    inner: Arc<T>,
    limit: Duration,
}

impl<T: ?Sized> Timed<T> {
    pub fn new(inner: Arc<T>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn within<R>(&self, call: &str, fut: impl Future<Output = Result<R>>) -> Result<R> {
        tokio::time::timeout(self.limit, fut).await.map_err(|_| {
            tracing::warn!(call, limit_secs = self.limit.as_secs(), "External call timed out");
            AppError::Transient(format!("{call} timed out after {}s", self.limit.as_secs()))
        })?
    }
}

#[async_trait]
impl SourceControlHost for Timed<dyn SourceControlHost> {
    async fn get_pull_request(&self, pr: u64) -> Result<PullRequest> {
        self.within("get_pull_request", self.inner.get_pull_request(pr)).await
    }

    async fn get_diff(&self, pr: u64) -> Result<String> {
        self.within("get_diff", self.inner.get_diff(pr)).await
    }

    async fn get_reviews(&self, pr: u64) -> Result<Vec<HostReview>> {
        self.within("get_reviews", self.inner.get_reviews(pr)).await
    }

    async fn get_comments(&self, pr: u64) -> Result<Vec<ReviewComment>> {
        self.within("get_comments", self.inner.get_comments(pr)).await
    }

    async fn post_review(&self, pr: u64, body: &str, comments: &[NewReviewComment]) -> Result<()> {
        self.within("post_review", self.inner.post_review(pr, body, comments)).await
    }

    async fn get_status_checks(&self, pr: u64) -> Result<Vec<StatusCheck>> {
        self.within("get_status_checks", self.inner.get_status_checks(pr)).await
    }

    async fn get_branch_protection(&self, branch: &str) -> Result<Option<BranchProtection>> {
        self.within("get_branch_protection", self.inner.get_branch_protection(branch))
            .await
    }

    async fn merge(&self, pr: u64, method: MergeMethod) -> Result<MergeResponse> {
        self.within("merge", self.inner.merge(pr, method)).await
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.within("delete_branch", self.inner.delete_branch(branch)).await
    }
}

#[async_trait]
impl IssueProvider for Timed<dyn IssueProvider> {
    async fn fetch(&self, issue_id: &str) -> Result<Issue> {
        self.within("fetch_issue", self.inner.fetch(issue_id)).await
    }

    async fn close(&self, issue_id: &str, comment: &str) -> Result<()> {
        self.within("close_issue", self.inner.close(issue_id, comment)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowIssues;

    #[async_trait]
    impl IssueProvider for SlowIssues {
        async fn fetch(&self, issue_id: &str) -> Result<Issue> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Issue {
                id: issue_id.to_string(),
                title: String::new(),
                description: String::new(),
                labels: Vec::new(),
                assignee: None,
            })
        }

        async fn close(&self, _issue_id: &str, _comment: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_call_becomes_transient() {
        let inner: Arc<dyn IssueProvider> = Arc::new(SlowIssues);
        let timed = Timed::new(inner, Duration::from_millis(20));

        let err = timed.fetch("42").await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("fetch_issue timed out"));
        assert!(timed.close("42", "done").await.is_ok());
    }
}
