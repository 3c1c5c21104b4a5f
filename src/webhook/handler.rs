use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::queue::task::{Task, Trigger};
use crate::server::AppState;
use crate::state::WorkflowStatus;
use crate::webhook::events::{
    CheckSuiteEvent, PullRequestEvent, PullRequestReviewEvent, RepositoryPayload, StatusEvent,
    WebhookEvent,
};
use crate::webhook::signature::{verify_signature, EVENT_HEADER, SIGNATURE_HEADER};

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    // Extract required headers
    let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!("Missing X-Hub-Signature-256 header");
            return StatusCode::UNAUTHORIZED;
        }
    };

    let event_type = match headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok()) {
        Some(et) => et.to_string(),
        None => {
            tracing::warn!("Missing X-GitHub-Event header");
            return StatusCode::BAD_REQUEST;
        }
    };

    // Verify signature
    if let Err(e) = verify_signature(state.config.webhook_secret(), &body, &signature) {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    // Parse event
    let event = match WebhookEvent::parse(&event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, event_type = %event_type, "Failed to parse webhook event");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(event_type = %event_type, "Received webhook event");

    match event {
        WebhookEvent::PullRequest(event) => handle_pull_request_event(&state, event).await,
        WebhookEvent::PullRequestReview(event) => handle_review_event(&state, event).await,
        WebhookEvent::CheckSuite(event) => handle_check_suite_event(&state, event).await,
        WebhookEvent::Status(event) => handle_status_event(&state, event).await,
        WebhookEvent::Ping => {
            tracing::info!("Received ping event");
            StatusCode::OK
        }
        WebhookEvent::Unsupported(event_type) => {
            tracing::debug!(event_type = %event_type, "Ignoring unsupported event");
            StatusCode::OK
        }
    }
}

fn is_tracked_repo(state: &AppState, repository: &RepositoryPayload) -> bool {
    let github = &state.config.github;
    let expected = format!("{}/{}", github.owner, github.repo);
    if repository.full_name.eq_ignore_ascii_case(&expected) {
        return true;
    }
    tracing::debug!(repo = %repository.full_name, "Ignoring event for untracked repository");
    false
}

/// Enqueue a step for the open workflow bound to each PR. Returns how many were queued.
async fn enqueue_for_prs(state: &AppState, pr_numbers: &[u64]) -> usize {
    let store = &state.orchestrator.context().store;
    let mut issue_ids = Vec::new();

    for &pr in pr_numbers {
        match store.find_by_pr(pr) {
            Ok(Some(workflow)) if !workflow.is_terminal() => issue_ids.push(workflow.issue_id),
            Ok(_) => tracing::debug!(pr = pr, "No open workflow for pull request"),
            Err(e) => tracing::error!(pr = pr, error = %e, "Failed to look up workflow"),
        }
    }

    let mut queue = state.task_queue.write().await;
    issue_ids
        .into_iter()
        .filter(|id| queue.enqueue(Task::step(id.clone(), Trigger::Webhook)))
        .count()
}

fn accepted(enqueued: usize) -> StatusCode {
    if enqueued > 0 {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    }
}

async fn handle_pull_request_event(state: &AppState, event: PullRequestEvent) -> StatusCode {
    // New commits make reviews stale; a close may be an external merge
    if !matches!(event.action.as_str(), "synchronize" | "closed" | "reopened") {
        return StatusCode::OK;
    }
    if !is_tracked_repo(state, &event.repository) {
        return StatusCode::OK;
    }

    tracing::info!(
        pr = event.number,
        action = %event.action,
        merged = event.pull_request.merged,
        head = %event.pull_request.head.sha,
        "Pull request updated"
    );
    accepted(enqueue_for_prs(state, &[event.number]).await)
}

async fn handle_review_event(state: &AppState, event: PullRequestReviewEvent) -> StatusCode {
    if event.action != "submitted" && event.action != "dismissed" {
        return StatusCode::OK;
    }
    if !is_tracked_repo(state, &event.repository) {
        return StatusCode::OK;
    }

    // Our own AI reviews must not trigger another step
    if event.review.user.is_bot(state.config.github.bot_login.as_deref()) {
        tracing::debug!(user = %event.review.user.login, "Ignoring review from bot");
        return StatusCode::OK;
    }

    tracing::info!(
        pr = event.pull_request.number,
        reviewer = %event.review.user.login,
        review_state = %event.review.state,
        "Review submitted"
    );
    accepted(enqueue_for_prs(state, &[event.pull_request.number]).await)
}

async fn handle_check_suite_event(state: &AppState, event: CheckSuiteEvent) -> StatusCode {
    if event.action != "completed" || !is_tracked_repo(state, &event.repository) {
        return StatusCode::OK;
    }

    let prs: Vec<u64> = event.check_suite.pull_requests.iter().map(|p| p.number).collect();
    tracing::info!(
        sha = %event.check_suite.head_sha,
        conclusion = ?event.check_suite.conclusion,
        prs = ?prs,
        "Check suite completed"
    );
    accepted(enqueue_for_prs(state, &prs).await)
}

/// Status events name only a commit, so every workflow waiting on the gate
/// is re-stepped.
async fn handle_status_event(state: &AppState, event: StatusEvent) -> StatusCode {
    if event.state == "pending" || !is_tracked_repo(state, &event.repository) {
        return StatusCode::OK;
    }

    let waiting: Vec<String> = match state.orchestrator.context().store.list() {
        Ok(workflows) => workflows
            .into_iter()
            .filter(|w| w.status == WorkflowStatus::ReadyToMerge)
            .map(|w| w.issue_id)
            .collect(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list workflows");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    tracing::info!(
        sha = %event.sha,
        context = %event.context,
        state = %event.state,
        waiting = waiting.len(),
        "Commit status reported"
    );

    let mut queue = state.task_queue.write().await;
    let enqueued = waiting
        .into_iter()
        .filter(|id| queue.enqueue(Task::step(id.clone(), Trigger::Webhook)))
        .count();
    accepted(enqueued)
}
