use std::path::PathBuf;

use chrono::Utc;

use crate::agent::{prompt, AgentContext, AgentResponse};
use crate::error::{AppError, Result};
use crate::merge::executor::is_valid_sha;
use crate::merge::validation::{is_bot, latest_verdicts};
use crate::merge::{
    ConflictAnalyzer, MergeExecutor, MergeValidationPipeline, PostMergeCleanupCoordinator,
};
use crate::platform::types::{HostReview, PrState, PullRequest, ReviewComment, ReviewState};
use crate::review::{Comment, CommentCategory, CommentProcessor, DiffAnchors, ResolutionAction};
use crate::state::{
    MergeSummary, ResolutionStatus, Review, ReviewKind, ReviewStatus, WorkflowState,
    WorkflowStatus,
};
use crate::workflow::context::WorkflowContext;
use crate::workflow::types::CompletionStatus;
use crate::workspace::git::validate_branch_name;

/// Errors whose cause is written into the workflow record before they are
/// returned. Anything else leaves the record untouched.
fn records_state(err: &AppError) -> bool {
    match err {
        AppError::Validation(_)
        | AppError::ConflictDetected(_)
        | AppError::IterationLimitExceeded { .. }
        | AppError::NonRecoverableHost(_) => true,
        AppError::Host { .. } => !err.is_transient(),
        _ => false,
    }
}

/// Write a host failure into the record when the failing transition did not.
/// Gate, conflict and iteration errors are recorded where they arise.
fn record_error(state: &mut WorkflowState, err: &AppError) -> Result<()> {
    if state.status.is_terminal() {
        return Ok(());
    }
    match err {
        AppError::NonRecoverableHost(_) => {
            let during = state.status;
            state.fail(format!("{err} (during {during})"))
        }
        AppError::Host { .. } => {
            let item = format!("Code host rejected a request: {err}");
            if !state.blocking_items.contains(&item) {
                state.blocking_items.push(item);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Next status on the way to MERGING for a pull request that was merged
/// outside the cycle. Walks only legal edges.
fn toward_merging(status: WorkflowStatus) -> Option<WorkflowStatus> {
    match status {
        WorkflowStatus::Created | WorkflowStatus::AiReviewing | WorkflowStatus::AddressingComments => {
            Some(WorkflowStatus::AwaitingHumanReview)
        }
        WorkflowStatus::AwaitingHumanReview => Some(WorkflowStatus::ReadyToMerge),
        WorkflowStatus::ReadyToMerge => Some(WorkflowStatus::Merging),
        WorkflowStatus::Merging | WorkflowStatus::Completed | WorkflowStatus::Failed => None,
    }
}

/// Change requests recorded since the last update, as pseudo-comments so
/// that review bodies without line comments still reach the agent.
fn review_requests_as_comments(state: &WorkflowState) -> Vec<ReviewComment> {
    let start = state
        .reviews
        .iter()
        .rposition(|r| r.kind == ReviewKind::AiUpdate)
        .map_or(0, |i| i + 1);

    state.reviews[start..]
        .iter()
        .filter(|r| r.kind == ReviewKind::Human && r.status == ReviewStatus::ChangesRequested)
        .filter_map(|r| {
            let body = r.comments.first()?;
            let id = r.metadata.get("host_review_id")?.as_u64()?;
            Some(ReviewComment {
                id,
                author: r.reviewer.clone().unwrap_or_default(),
                body: body.clone(),
                path: None,
                line: None,
                thread_id: id,
                created_at: r.timestamp,
            })
        })
        .collect()
}

fn describe_comment(comment: &Comment) -> String {
    let location = match (&comment.file, comment.line) {
        (Some(file), Some(line)) => format!(" on {file}:{line}"),
        (Some(file), None) => format!(" on {file}"),
        _ => String::new(),
    };
    let category = match comment.category {
        CommentCategory::Security => "security",
        CommentCategory::Bug => "bug",
        CommentCategory::Performance => "performance",
        CommentCategory::Style => "style",
        CommentCategory::Other => "review",
    };
    format!(
        "Unresolved {category} comment by @{}{location} (thread {})",
        comment.author, comment.thread_id
    )
}

/// Drives one issue's review cycle, one transition per [`step`](Self::step).
pub struct ReviewCycleOrchestrator {
    ctx: WorkflowContext,
    comments: CommentProcessor,
}

impl ReviewCycleOrchestrator {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self {
            ctx,
            comments: CommentProcessor::new(),
        }
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    /// Create the workflow record for an issue whose pull request is open.
    /// A worktree is created when no path is given.
    pub async fn start(
        &self,
        issue_id: &str,
        pr_number: u64,
        branch: &str,
        worktree: Option<PathBuf>,
    ) -> Result<WorkflowState> {
        validate_branch_name(branch)?;
        if self.ctx.store.exists(issue_id)? {
            return Err(AppError::Validation(format!(
                "A workflow already exists for issue {issue_id}"
            )));
        }

        let issue = self.ctx.issues.fetch(issue_id).await?;
        let worktree = match worktree {
            Some(path) => path,
            None => self.ctx.worktrees.create(&issue, branch).await?,
        };

        let state = WorkflowState::new(issue_id, pr_number, branch, Some(worktree));
        self.ctx.store.create(&state)?;
        tracing::info!(issue = %issue_id, pr = pr_number, branch = branch, title = %issue.title, "Started workflow");
        Ok(state)
    }

    /// Load, make at most one transition, persist.
    ///
    /// Safe to call repeatedly: a step with nothing new to act on leaves the
    /// record byte-for-byte unchanged. Concurrent steps for the same issue
    /// fail with [`AppError::StateLocked`].
    pub async fn step(&self, issue_id: &str) -> Result<WorkflowState> {
        let _lock = self.ctx.store.lock(issue_id)?;
        let loaded = self.ctx.store.load(issue_id)?;
        let mut state = loaded.clone();

        match self.advance(&mut state).await {
            Ok(()) => {
                self.persist(&loaded, &mut state)?;
                Ok(state)
            }
            Err(e) if records_state(&e) => {
                record_error(&mut state, &e)?;
                self.persist(&loaded, &mut state)?;
                tracing::warn!(issue = %issue_id, status = %state.status, category = e.category(), error = %e, "Step failed, recorded in workflow");
                Err(e)
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(issue = %issue_id, status = %loaded.status, error = %e, "Step failed transiently, will retry");
                } else {
                    tracing::error!(issue = %issue_id, status = %loaded.status, error = %e, "Step failed");
                }
                Err(e)
            }
        }
    }

    fn persist(&self, loaded: &WorkflowState, state: &mut WorkflowState) -> Result<()> {
        if state.same_content(loaded) {
            tracing::debug!(issue = %state.issue_id, status = %state.status, "No-op poll");
            return Ok(());
        }

        state.updated_at = Utc::now();
        self.ctx.store.save(state)?;
        if state.status != loaded.status {
            tracing::info!(
                issue = %state.issue_id,
                from = %loaded.status,
                to = %state.status,
                iteration = state.review_iteration,
                "Transitioned workflow"
            );
        }
        Ok(())
    }

    async fn advance(&self, state: &mut WorkflowState) -> Result<()> {
        match state.status {
            WorkflowStatus::Created => self.begin(state),
            WorkflowStatus::AiReviewing => self.run_ai_review(state).await,
            WorkflowStatus::AwaitingHumanReview => self.poll_reviews(state).await,
            WorkflowStatus::AddressingComments => self.address_comments(state).await,
            WorkflowStatus::ReadyToMerge => self.run_gate(state).await,
            WorkflowStatus::Merging => self.run_merge(state).await,
            WorkflowStatus::Completed | WorkflowStatus::Failed => Ok(()),
        }
    }

    fn begin(&self, state: &mut WorkflowState) -> Result<()> {
        let next = if self.ctx.config.review.ai_review_first {
            WorkflowStatus::AiReviewing
        } else {
            WorkflowStatus::AwaitingHumanReview
        };
        state.transition_to(next)
    }

    /// Follow a pull request that was merged or closed outside the cycle.
    /// Returns true when that decided the step.
    fn follow_host_state(&self, state: &mut WorkflowState, pr: &PullRequest) -> Result<bool> {
        if pr.is_merged() {
            let Some(next) = toward_merging(state.status) else {
                return Ok(false);
            };
            tracing::info!(issue = %state.issue_id, pr = pr.number, to = %next, "Pull request merged outside the review cycle");
            state.blocking_items.clear();
            state.transition_to(next)?;
            return Ok(true);
        }
        if pr.state == PrState::Closed {
            let reason = format!(
                "Pull request #{} was closed without merging; reopen it or start a new workflow",
                pr.number
            );
            state.fail(reason.clone())?;
            return Err(AppError::NonRecoverableHost(reason));
        }
        Ok(false)
    }

    fn agent_context(&self, state: &WorkflowState) -> AgentContext {
        AgentContext {
            pr_number: Some(state.pr_number),
            working_dir: state.worktree_path.clone(),
        }
    }

    /// Any agent failure, including a timeout, is transient.
    async fn invoke_agent(&self, agent: &str, prompt: &str, context: &AgentContext) -> Result<AgentResponse> {
        let timeout = self.ctx.config.agent_timeout();
        let response = tokio::time::timeout(timeout, self.ctx.agent.invoke(agent, prompt, context))
            .await
            .map_err(|_| {
                AppError::Transient(format!("Agent '{agent}' timed out after {}s", timeout.as_secs()))
            })?
            .map_err(|e| {
                if e.is_transient() {
                    e
                } else {
                    AppError::Transient(format!("Agent '{agent}' failed: {e}"))
                }
            })?;

        if !response.success {
            return Err(AppError::Transient(format!(
                "Agent '{agent}' failed: {}",
                response.error.as_deref().unwrap_or("no reply")
            )));
        }
        Ok(response)
    }

    async fn run_ai_review(&self, state: &mut WorkflowState) -> Result<()> {
        let config = &self.ctx.config;
        let pr = self.ctx.host.get_pull_request(state.pr_number).await?;
        if self.follow_host_state(state, &pr)? {
            return Ok(());
        }
        let diff = self.ctx.host.get_diff(state.pr_number).await?;

        let prompt = prompt::review_prompt(pr.number, &pr.title, &pr.body, &diff);
        let response = self
            .invoke_agent(&config.claude.review_agent, &prompt, &self.agent_context(state))
            .await?;

        let anchors = DiffAnchors::parse(&diff);
        let (anchored, dropped): (Vec<_>, Vec<_>) = response
            .structured_changes
            .comments
            .into_iter()
            .partition(|c| anchors.contains(&c.path, c.line));
        if !dropped.is_empty() {
            tracing::warn!(pr = pr.number, dropped = dropped.len(), "Dropping AI comments outside the diff");
        }

        self.ctx.host.post_review(pr.number, &response.text, &anchored).await?;

        let reviewer = config
            .github
            .bot_login
            .clone()
            .unwrap_or_else(|| config.claude.review_agent.clone());
        let review = Review::new(ReviewKind::Ai, ReviewStatus::CommentsPosted)
            .with_reviewer(reviewer)
            .with_metadata("comment_count", anchored.len())
            .with_metadata("head_sha", pr.head_sha.clone())
            .with_comments(anchored.into_iter().map(|c| c.body).collect());
        state.append_review(review);

        tracing::info!(issue = %state.issue_id, pr = pr.number, "Posted AI review");
        state.transition_to(WorkflowStatus::AwaitingHumanReview)
    }

    async fn poll_reviews(&self, state: &mut WorkflowState) -> Result<()> {
        let config = &self.ctx.config;
        let pr = self.ctx.host.get_pull_request(state.pr_number).await?;
        if self.follow_host_state(state, &pr)? {
            return Ok(());
        }
        let reviews = self.ctx.host.get_reviews(state.pr_number).await?;

        let mut new_change_request = false;
        for review in &reviews {
            if state.has_processed_review(review.id) || is_bot(&review.author, config) {
                continue;
            }
            let status = match review.state {
                ReviewState::Approved => ReviewStatus::Approved,
                ReviewState::ChangesRequested => ReviewStatus::ChangesRequested,
                _ => continue,
            };
            new_change_request |= status == ReviewStatus::ChangesRequested;

            let comments = if review.body.trim().is_empty() {
                Vec::new()
            } else {
                vec![review.body.clone()]
            };
            let mut record = Review::new(ReviewKind::Human, status)
                .with_reviewer(&review.author)
                .with_comments(comments)
                .with_metadata("host_review_id", review.id);
            if let Some(submitted) = review.submitted_at {
                record.timestamp = submitted;
            }
            state.append_review(record);
            state.processed_reviews.push(review.id);
            tracing::info!(issue = %state.issue_id, reviewer = %review.author, verdict = ?status, "Recorded human review");
        }

        if new_change_request {
            let max = config.review.max_review_iterations;
            if state.review_iteration >= max {
                let iterations = state.review_iteration;
                state.fail(format!(
                    "max iterations exceeded ({iterations}/{max}); resolve the remaining feedback manually"
                ))?;
                tracing::error!(issue = %state.issue_id, iterations, max, "Review cycle hit the iteration cap");
                return Err(AppError::IterationLimitExceeded { iterations, max });
            }
            return state.transition_to(WorkflowStatus::AddressingComments);
        }

        let completion = self.completion(state, &reviews).await?;
        state.blocking_items = completion.blocking_items;
        if completion.ready {
            return state.transition_to(WorkflowStatus::ReadyToMerge);
        }
        Ok(())
    }

    async fn completion(&self, state: &WorkflowState, reviews: &[HostReview]) -> Result<CompletionStatus> {
        let raw = self.ctx.host.get_comments(state.pr_number).await?;
        let diff = self.ctx.host.get_diff(state.pr_number).await?;
        Ok(self.evaluate_completion(state, reviews, &raw, &diff))
    }

    /// Ready when approvals reach the requirement, nobody's latest verdict
    /// requests changes and no blocking human comment is unresolved.
    /// Threads opened by a reviewer who has since approved do not block.
    pub fn evaluate_completion(
        &self,
        state: &WorkflowState,
        reviews: &[HostReview],
        raw_comments: &[ReviewComment],
        diff: &str,
    ) -> CompletionStatus {
        let config = &self.ctx.config;
        let verdicts = latest_verdicts(reviews, config);
        let approvers: Vec<&str> = verdicts
            .iter()
            .filter(|(_, r)| r.state == ReviewState::Approved)
            .map(|(author, _)| *author)
            .collect();

        let analyzed = self.comments.analyze(raw_comments, &state.comment_resolutions);
        let anchors = DiffAnchors::parse(diff);
        let open: Vec<&Comment> = self
            .comments
            .get_unresolved(&analyzed, Some(&anchors))
            .into_iter()
            .filter(|c| !is_bot(&c.author, config) && !approvers.contains(&c.author.as_str()))
            .collect();
        let blocking = self.comments.blocking(&open, config.review.blocking_priority);

        let mut items = Vec::new();
        let required = config.review.required_approvals;
        let approvals = approvers.len() as u32;
        if approvals < required {
            items.push(format!(
                "Needs {} more approval(s) ({approvals} of {required})",
                required - approvals
            ));
        }
        for (author, review) in &verdicts {
            if review.state == ReviewState::ChangesRequested {
                items.push(format!("@{author} has requested changes"));
            }
        }
        items.extend(blocking.iter().map(|c| describe_comment(c)));

        if items.is_empty() {
            return CompletionStatus::ready(format!("{approvals} approval(s), no blocking comments"));
        }
        let reason = if state.review_iteration >= config.review.max_review_iterations {
            "max iterations exceeded"
        } else {
            "awaiting review"
        };
        CompletionStatus::blocked(reason, items)
    }

    /// Read-only completion check against the host's current reviews.
    pub async fn check_cycle_completion(&self, state: &WorkflowState) -> Result<CompletionStatus> {
        match state.status {
            WorkflowStatus::Completed => Ok(CompletionStatus::ready("merged")),
            WorkflowStatus::Failed => Ok(CompletionStatus::blocked(
                state.failure_reason.clone().unwrap_or_else(|| "failed".to_string()),
                Vec::new(),
            )),
            _ => {
                let reviews = self.ctx.host.get_reviews(state.pr_number).await?;
                self.completion(state, &reviews).await
            }
        }
    }

    async fn address_comments(&self, state: &mut WorkflowState) -> Result<()> {
        let config = &self.ctx.config;
        let worktree = state.worktree_path.clone().ok_or_else(|| {
            AppError::Workspace(format!(
                "Workflow {} has no worktree to apply changes in",
                state.issue_id
            ))
        })?;

        let pr = self.ctx.host.get_pull_request(state.pr_number).await?;
        if self.follow_host_state(state, &pr)? {
            return Ok(());
        }

        let mut raw = review_requests_as_comments(state);
        raw.extend(self.ctx.host.get_comments(state.pr_number).await?);
        let diff = self.ctx.host.get_diff(state.pr_number).await?;

        let analyzed = self.comments.analyze(&raw, &state.comment_resolutions);
        let anchors = DiffAnchors::parse(&diff);
        let unresolved = self.comments.get_unresolved(&analyzed, Some(&anchors));

        let mut files_changed = 0;
        let mut pushed = false;
        let mut addressed = Vec::new();
        let mut out_of_scope = Vec::new();
        let mut summary = Vec::new();

        if unresolved.is_empty() {
            tracing::info!(issue = %state.issue_id, "No unresolved feedback to address");
        } else {
            let prompt = prompt::update_prompt(state.pr_number, &unresolved);
            let response = self
                .invoke_agent(&config.claude.update_agent, &prompt, &self.agent_context(state))
                .await?;
            let changes = response.structured_changes;

            if !changes.files.is_empty() {
                files_changed = self.ctx.worktrees.apply_changes(&worktree, &changes.files).await?;
                let message = format!(
                    "Address review feedback on #{} (iteration {})",
                    state.pr_number,
                    state.review_iteration + 1
                );
                pushed = self
                    .ctx
                    .worktrees
                    .commit_and_push(&worktree, &state.branch, &message)
                    .await?;
            }
            addressed = changes.addressed_threads;
            out_of_scope = changes.out_of_scope_threads;
            summary.push(response.text);
        }

        let code_change = ResolutionAction::CodeChange {
            referenced_threads: addressed.clone(),
        };
        for comment in &unresolved {
            let action = if out_of_scope.contains(&comment.thread_id) {
                &ResolutionAction::OutOfScope
            } else if pushed {
                &code_change
            } else {
                &ResolutionAction::NoAction
            };
            let mut tracked = (*comment).clone();
            match self.comments.track_resolution(&mut tracked, action) {
                ResolutionStatus::Unresolved => {}
                status => {
                    state.comment_resolutions.insert(comment.thread_id, status);
                }
            }
        }

        state.review_iteration += 1;
        let review = Review::new(ReviewKind::AiUpdate, ReviewStatus::Completed)
            .with_reviewer(config.claude.update_agent.clone())
            .with_comments(summary)
            .with_metadata("iteration", state.review_iteration)
            .with_metadata("files_changed", files_changed)
            .with_metadata("pushed", pushed)
            .with_metadata("addressed_threads", addressed)
            .with_metadata("out_of_scope_threads", out_of_scope);
        state.append_review(review);

        tracing::info!(
            issue = %state.issue_id,
            iteration = state.review_iteration,
            files = files_changed,
            pushed,
            "Addressed review feedback"
        );

        let next = if config.review.ai_review_on_update {
            WorkflowStatus::AiReviewing
        } else {
            WorkflowStatus::AwaitingHumanReview
        };
        state.transition_to(next)
    }

    /// Gate failures keep the workflow at READY_TO_MERGE with the blocking
    /// items recorded; new reviews or checks can clear them.
    async fn run_gate(&self, state: &mut WorkflowState) -> Result<()> {
        let pr = self.ctx.host.get_pull_request(state.pr_number).await?;
        if self.follow_host_state(state, &pr)? {
            return Ok(());
        }

        let pipeline = MergeValidationPipeline::new(self.ctx.host.clone(), self.ctx.config.clone());
        let gate = pipeline.run(state.pr_number).await?;

        state.last_gate = Some(gate.summary());
        state.blocking_items = gate.items();
        if !gate.success {
            return Err(AppError::Validation(gate.failure_message()));
        }
        state.transition_to(WorkflowStatus::Merging)
    }

    fn executor(&self) -> MergeExecutor {
        let config = &self.ctx.config;
        let analyzer = ConflictAnalyzer::new(
            Some(self.ctx.agent.clone()),
            config.claude.conflict_agent.clone(),
            config.agent_timeout(),
        );
        MergeExecutor::new(
            self.ctx.host.clone(),
            Some(self.ctx.worktrees.clone()),
            analyzer,
            config.merge.merge_retry_attempts,
            config.merge_retry_delay(),
        )
    }

    async fn run_merge(&self, state: &mut WorkflowState) -> Result<()> {
        let config = &self.ctx.config;
        let pr = self.ctx.host.get_pull_request(state.pr_number).await?;

        if pr.is_merged() {
            tracing::info!(issue = %state.issue_id, pr = pr.number, "Pull request already merged");
            if !state.merge.as_ref().is_some_and(|m| m.success) {
                state.merge = Some(MergeSummary {
                    success: true,
                    method: config.merge.method.to_string(),
                    commit_sha: pr.merge_commit_sha.clone().filter(|s| is_valid_sha(s)),
                    retry_count: 0,
                    conflict_files: Vec::new(),
                    error: None,
                });
            }
            self.cleanup(state).await;
            return Ok(());
        }

        self.follow_host_state(state, &pr)?;

        let result = self
            .executor()
            .execute(&pr, config.merge.method, state.worktree_path.as_deref())
            .await?;
        state.merge = Some(result.summary());

        if result.success {
            self.cleanup(state).await;
            return Ok(());
        }

        let error = result.error.clone().unwrap_or_else(|| "merge failed".to_string());
        if let Some(report) = &result.conflict_details {
            state.blocking_items = report
                .conflicts
                .iter()
                .map(|c| {
                    format!(
                        "Resolve {} conflict in {} ({})",
                        c.conflict_type.as_str(),
                        c.path,
                        c.complexity.as_str()
                    )
                })
                .collect();
            return Err(AppError::ConflictDetected(error));
        }

        state.fail(format!("Merge failed: {error}"))?;
        tracing::error!(issue = %state.issue_id, pr = pr.number, error = %error, "Merge failed");
        Err(AppError::NonRecoverableHost(error))
    }

    async fn cleanup(&self, state: &mut WorkflowState) {
        let config = &self.ctx.config;
        let coordinator = PostMergeCleanupCoordinator::new(
            config.cleanup.clone(),
            config.retention(),
            self.ctx.store.clone(),
            self.ctx.host.clone(),
            self.ctx.issues.clone(),
            self.ctx.worktrees.clone(),
        );
        let report = coordinator.run(state).await;
        if !report.all_succeeded() {
            tracing::warn!(issue = %state.issue_id, failed = ?report.failed_steps(), "Cleanup finished with failures");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_state_classification() {
        assert!(records_state(&AppError::Validation("gate".to_string())));
        assert!(records_state(&AppError::IterationLimitExceeded { iterations: 2, max: 2 }));
        assert!(records_state(&AppError::from_status(422, "Unprocessable Entity")));
        assert!(!records_state(&AppError::from_status(502, "Bad Gateway")));
        assert!(!records_state(&AppError::Transient("timeout".to_string())));
        assert!(!records_state(&AppError::StateLocked("42".to_string())));
    }

    #[test]
    fn test_record_error_marks_refusals_failed() {
        let mut state = WorkflowState::new("42", 7, "feature", None);
        state.status = WorkflowStatus::AwaitingHumanReview;

        let rejected = AppError::from_status(422, "Validation Failed");
        record_error(&mut state, &rejected).unwrap();
        record_error(&mut state, &rejected).unwrap();
        assert_eq!(state.status, WorkflowStatus::AwaitingHumanReview);
        assert_eq!(state.blocking_items.len(), 1);
        assert!(state.blocking_items[0].starts_with("Code host rejected a request"));

        record_error(&mut state, &AppError::NonRecoverableHost("403 Forbidden".to_string())).unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("403 Forbidden") && r.contains("AWAITING_HUMAN_REVIEW")));
    }

    #[test]
    fn test_external_merge_walks_legal_edges() {
        let mut status = WorkflowStatus::AddressingComments;
        let mut path = vec![status];
        while let Some(next) = toward_merging(status) {
            assert!(status.can_transition_to(next));
            status = next;
            path.push(status);
        }
        assert_eq!(
            path,
            vec![
                WorkflowStatus::AddressingComments,
                WorkflowStatus::AwaitingHumanReview,
                WorkflowStatus::ReadyToMerge,
                WorkflowStatus::Merging,
            ]
        );
    }

    #[test]
    fn test_change_requests_since_last_update() {
        let mut state = WorkflowState::new("42", 7, "feature", None);
        state.append_review(
            Review::new(ReviewKind::Human, ReviewStatus::ChangesRequested)
                .with_reviewer("alice")
                .with_comments(vec!["old request".to_string()])
                .with_metadata("host_review_id", 1u64),
        );
        state.append_review(Review::new(ReviewKind::AiUpdate, ReviewStatus::Completed));
        state.append_review(
            Review::new(ReviewKind::Human, ReviewStatus::ChangesRequested)
                .with_reviewer("bob")
                .with_comments(vec!["please add tests".to_string()])
                .with_metadata("host_review_id", 2u64),
        );
        state.append_review(
            Review::new(ReviewKind::Human, ReviewStatus::ChangesRequested)
                .with_reviewer("carol")
                .with_metadata("host_review_id", 3u64),
        );

        let pending = review_requests_as_comments(&state);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].thread_id, 2);
        assert_eq!(pending[0].author, "bob");
    }

    #[test]
    fn test_describe_comment() {
        let comment = Comment {
            id: 5,
            thread_id: 5,
            author: "alice".to_string(),
            file: Some("src/lib.rs".to_string()),
            line: Some(10),
            body: "sql injection".to_string(),
            category: CommentCategory::Security,
            priority: 80,
            resolution: ResolutionStatus::Unresolved,
            created_at: Utc::now(),
        };
        assert_eq!(
            describe_comment(&comment),
            "Unresolved security comment by @alice on src/lib.rs:10 (thread 5)"
        );
    }
}
