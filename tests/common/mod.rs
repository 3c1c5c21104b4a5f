//! In-memory code host, issue tracker, agent and worktree manager for
//! driving workflows without network or git access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use hypha::agent::{AgentContext, AgentResponse, AiAgent, FileChange};
use hypha::config::AppConfig;
use hypha::error::{AppError, Result};
use hypha::platform::types::{
    BranchProtection, CheckState, HostReview, Issue, MergeMethod, MergeResponse, NewReviewComment,
    PrState, PullRequest, ReviewComment, ReviewState, StatusCheck,
};
use hypha::platform::{IssueProvider, SourceControlHost};
use hypha::state::WorkflowStateStore;
use hypha::workflow::{ReviewCycleOrchestrator, WorkflowContext};
use hypha::workspace::{TrialMerge, WorktreeManager};

pub const HEAD_SHA: &str = "abc1234";
pub const MERGE_SHA: &str = "0123456789abcdef0123456789abcdef01234567";
pub const BOT: &str = "hypha-bot";
pub const WEBHOOK_SECRET: &str = "hook-secret";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

pub fn pull_request(number: u64) -> PullRequest {
    PullRequest {
        number,
        title: "Add widget cache".to_string(),
        body: "Closes #42".to_string(),
        state: PrState::Open,
        head_branch: "feature/widget-cache".to_string(),
        head_sha: HEAD_SHA.to_string(),
        base_branch: "main".to_string(),
        draft: false,
        pushed_at: None,
        merge_commit_sha: None,
        mergeable: Some(true),
        mergeable_state: Some("clean".to_string()),
    }
}

/// A review on the current head, submitted `id` minutes after [`base_time`].
pub fn review(id: u64, author: &str, state: ReviewState) -> HostReview {
    HostReview {
        id,
        author: author.to_string(),
        body: String::new(),
        state,
        commit_id: Some(HEAD_SHA.to_string()),
        submitted_at: Some(base_time() + Duration::minutes(id as i64)),
    }
}

pub fn comment(id: u64, author: &str, path: &str, line: u32, body: &str) -> ReviewComment {
    ReviewComment {
        id,
        author: author.to_string(),
        body: body.to_string(),
        path: Some(path.to_string()),
        line: Some(line),
        thread_id: id,
        created_at: base_time() + Duration::minutes(id as i64),
    }
}

pub fn check(name: &str, state: CheckState) -> StatusCheck {
    StatusCheck {
        name: name.to_string(),
        state,
    }
}

/// Diff touching lines 1..=20 of `src/cache.rs`.
pub fn diff() -> String {
    let mut diff = String::from(
        "diff --git a/src/cache.rs b/src/cache.rs\n--- a/src/cache.rs\n+++ b/src/cache.rs\n@@ -0,0 +1,20 @@\n",
    );
    for i in 1..=20 {
        diff.push_str(&format!("+line {i}\n"));
    }
    diff
}

/// Defaults with no waiting: checks are not polled and merges retry immediately.
pub fn test_config(state_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.state.dir = state_dir.to_path_buf();
    config.github.owner = "acme".to_string();
    config.github.repo = "widgets".to_string();
    config.github.bot_login = Some(BOT.to_string());
    config.github.webhook_secret = WEBHOOK_SECRET.to_string();
    config.merge.check_timeout_secs = 0;
    config.merge.merge_retry_delay_secs = 0;
    config
}

#[derive(Default)]
pub struct MockHost {
    pub pr: Mutex<Option<PullRequest>>,
    pub diff: Mutex<String>,
    pub reviews: Mutex<Vec<HostReview>>,
    pub comments: Mutex<Vec<ReviewComment>>,
    pub checks: Mutex<Vec<StatusCheck>>,
    pub protection: Mutex<Option<BranchProtection>>,
    /// Scripted merge outcomes, consumed in order. Merges cleanly once empty.
    pub merge_responses: Mutex<VecDeque<Result<MergeResponse>>>,
    pub merge_calls: Mutex<Vec<(u64, MergeMethod)>>,
    pub posted_reviews: Mutex<Vec<(u64, String, Vec<NewReviewComment>)>>,
    pub deleted_branches: Mutex<Vec<String>>,
    pub pr_fetches: Mutex<u32>,
    pub fail_get_reviews: Mutex<Option<AppError>>,
    /// Status every `post_review` is refused with while set.
    pub refuse_post_review: Mutex<Option<u16>>,
    /// How long `get_reviews` hangs before answering.
    pub reviews_delay: Mutex<Option<std::time::Duration>>,
    pub fail_delete_branch: Mutex<bool>,
}

impl MockHost {
    pub fn new(pr: PullRequest) -> Self {
        Self {
            pr: Mutex::new(Some(pr)),
            diff: Mutex::new(diff()),
            ..Default::default()
        }
    }

    pub fn set_reviews(&self, reviews: Vec<HostReview>) {
        *self.reviews.lock().unwrap() = reviews;
    }

    pub fn set_comments(&self, comments: Vec<ReviewComment>) {
        *self.comments.lock().unwrap() = comments;
    }

    pub fn set_checks(&self, checks: Vec<StatusCheck>) {
        *self.checks.lock().unwrap() = checks;
    }

    pub fn push_merge_response(&self, response: Result<MergeResponse>) {
        self.merge_responses.lock().unwrap().push_back(response);
    }

    pub fn update_pr(&self, f: impl FnOnce(&mut PullRequest)) {
        if let Some(pr) = self.pr.lock().unwrap().as_mut() {
            f(pr);
        }
    }

    pub fn merge_call_count(&self) -> usize {
        self.merge_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceControlHost for MockHost {
    async fn get_pull_request(&self, pr: u64) -> Result<PullRequest> {
        *self.pr_fetches.lock().unwrap() += 1;
        self.pr
            .lock()
            .unwrap()
            .clone()
            .filter(|p| p.number == pr)
            .ok_or_else(|| AppError::Host {
                status: Some(404),
                message: format!("pull request #{pr} not found"),
            })
    }

    async fn get_diff(&self, _pr: u64) -> Result<String> {
        Ok(self.diff.lock().unwrap().clone())
    }

    async fn get_reviews(&self, _pr: u64) -> Result<Vec<HostReview>> {
        let delay = *self.reviews_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_get_reviews.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.reviews.lock().unwrap().clone())
    }

    async fn get_comments(&self, _pr: u64) -> Result<Vec<ReviewComment>> {
        Ok(self.comments.lock().unwrap().clone())
    }

    async fn post_review(&self, pr: u64, body: &str, comments: &[NewReviewComment]) -> Result<()> {
        if let Some(status) = *self.refuse_post_review.lock().unwrap() {
            return Err(AppError::from_status(status, "review refused"));
        }
        self.posted_reviews
            .lock()
            .unwrap()
            .push((pr, body.to_string(), comments.to_vec()));
        Ok(())
    }

    async fn get_status_checks(&self, _pr: u64) -> Result<Vec<StatusCheck>> {
        Ok(self.checks.lock().unwrap().clone())
    }

    async fn get_branch_protection(&self, _branch: &str) -> Result<Option<BranchProtection>> {
        Ok(self.protection.lock().unwrap().clone())
    }

    async fn merge(&self, pr: u64, method: MergeMethod) -> Result<MergeResponse> {
        self.merge_calls.lock().unwrap().push((pr, method));
        let scripted = self.merge_responses.lock().unwrap().pop_front();
        let response = scripted.unwrap_or_else(|| {
            Ok(MergeResponse::Merged {
                sha: Some(MERGE_SHA.to_string()),
                message: "Pull Request successfully merged".to_string(),
            })
        });
        if matches!(response, Ok(MergeResponse::Merged { .. })) {
            self.update_pr(|p| {
                p.state = PrState::Merged;
                p.merge_commit_sha = Some(MERGE_SHA.to_string());
            });
        }
        response
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        if *self.fail_delete_branch.lock().unwrap() {
            return Err(AppError::Host {
                status: Some(422),
                message: "Reference does not exist".to_string(),
            });
        }
        self.deleted_branches.lock().unwrap().push(branch.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockIssues {
    pub closed: Mutex<Vec<(String, String)>>,
    pub fail_close: Mutex<bool>,
}

#[async_trait]
impl IssueProvider for MockIssues {
    async fn fetch(&self, issue_id: &str) -> Result<Issue> {
        Ok(Issue {
            id: issue_id.to_string(),
            title: "Cache widget lookups".to_string(),
            description: "Lookups hit the database every time".to_string(),
            labels: vec!["enhancement".to_string()],
            assignee: None,
        })
    }

    async fn close(&self, issue_id: &str, comment: &str) -> Result<()> {
        if *self.fail_close.lock().unwrap() {
            return Err(AppError::NonRecoverableHost("issue tracker refused".to_string()));
        }
        self.closed
            .lock()
            .unwrap()
            .push((issue_id.to_string(), comment.to_string()));
        Ok(())
    }
}

/// Replies are consumed in order; once empty every call gets a plain reply.
#[derive(Default)]
pub struct MockAgent {
    pub replies: Mutex<VecDeque<Result<AgentResponse>>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockAgent {
    pub fn push_reply(&self, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(AgentResponse::ok(text)));
    }

    pub fn push_error(&self, err: AppError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn agents_called(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }
}

#[async_trait]
impl AiAgent for MockAgent {
    async fn invoke(&self, agent: &str, prompt: &str, _context: &AgentContext) -> Result<AgentResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((agent.to_string(), prompt.to_string()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AgentResponse::ok("No further remarks.")))
    }
}

#[derive(Default)]
pub struct MockWorktrees {
    pub created: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<PathBuf>>,
    pub applied: Mutex<Vec<FileChange>>,
    pub commits: Mutex<Vec<String>>,
    pub deleted_local: Mutex<Vec<String>>,
    pub trial: Mutex<Option<TrialMerge>>,
    pub fail_remove: Mutex<bool>,
}

#[async_trait]
impl WorktreeManager for MockWorktrees {
    async fn create(&self, issue: &Issue, branch: &str) -> Result<PathBuf> {
        self.created.lock().unwrap().push(branch.to_string());
        Ok(PathBuf::from(format!("/tmp/worktrees/issue-{}", issue.id)))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        if *self.fail_remove.lock().unwrap() {
            return Err(AppError::Workspace(format!("{} is busy", path.display())));
        }
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn apply_changes(&self, _path: &Path, files: &[FileChange]) -> Result<usize> {
        self.applied.lock().unwrap().extend_from_slice(files);
        Ok(files.len())
    }

    async fn commit_and_push(&self, _path: &Path, _branch: &str, message: &str) -> Result<bool> {
        self.commits.lock().unwrap().push(message.to_string());
        Ok(true)
    }

    async fn delete_local_branch(&self, branch: &str) -> Result<()> {
        self.deleted_local.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    async fn trial_merge(&self, _path: &Path, base: &str) -> Result<TrialMerge> {
        self.trial
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AppError::Git(format!("no trial merge scripted against {base}")))
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub host: Arc<MockHost>,
    pub issues: Arc<MockIssues>,
    pub agent: Arc<MockAgent>,
    pub worktrees: Arc<MockWorktrees>,
    pub orchestrator: ReviewCycleOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(&tmp.path().join("state"));
        adjust(&mut config);

        let store = WorkflowStateStore::open(&config.state.dir).unwrap();
        let host = Arc::new(MockHost::new(pull_request(7)));
        let issues = Arc::new(MockIssues::default());
        let agent = Arc::new(MockAgent::default());
        let worktrees = Arc::new(MockWorktrees::default());

        let ctx = WorkflowContext::new(
            config,
            store,
            host.clone(),
            issues.clone(),
            agent.clone(),
            worktrees.clone(),
        );

        Self {
            tmp,
            host,
            issues,
            agent,
            worktrees,
            orchestrator: ReviewCycleOrchestrator::new(ctx),
        }
    }

    pub fn context(&self) -> WorkflowContext {
        self.orchestrator.context().clone()
    }

    pub fn store(&self) -> &WorkflowStateStore {
        &self.orchestrator.context().store
    }

    /// Start the workflow for issue 42 / PR #7 on its own worktree.
    pub async fn start(&self) {
        self.orchestrator
            .start("42", 7, "feature/widget-cache", None)
            .await
            .unwrap();
    }
}
