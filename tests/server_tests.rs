mod common;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;

use common::*;

use hypha::queue::poller::poll_once;
use hypha::server::AppState;
use hypha::state::{WorkflowState, WorkflowStatus};
use hypha::webhook::handler::handle_webhook;
use hypha::webhook::signature::{sign, EVENT_HEADER, SIGNATURE_HEADER};

async fn app(h: &Harness) -> Arc<AppState> {
    h.start().await;
    Arc::new(AppState::new(h.context()))
}

async fn deliver(state: &Arc<AppState>, event: &str, payload: serde_json::Value, secret: &str) -> StatusCode {
    let body = serde_json::to_vec(&payload).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(EVENT_HEADER, HeaderValue::from_str(event).unwrap());
    headers.insert(
        SIGNATURE_HEADER,
        HeaderValue::from_str(&sign(secret, &body).unwrap()).unwrap(),
    );
    handle_webhook(State(Arc::clone(state)), headers, Bytes::from(body)).await
}

fn review_event(login: &str, user_type: &str, repo: &str) -> serde_json::Value {
    json!({
        "action": "submitted",
        "review": {"id": 501, "state": "approved", "user": {"login": login, "type": user_type}},
        "pull_request": {"number": 7, "head": {"ref": "feature/widget-cache", "sha": HEAD_SHA}},
        "repository": {"full_name": repo}
    })
}

async fn pending(state: &AppState) -> usize {
    state.task_queue.read().await.pending_count()
}

#[tokio::test]
async fn test_review_webhook_enqueues_step() {
    let h = Harness::new();
    let state = app(&h).await;

    let status = deliver(&state, "pull_request_review", review_event("alice", "User", "acme/widgets"), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(pending(&state).await, 1);

    // Already pending for this issue
    let status = deliver(&state, "pull_request_review", review_event("bob", "User", "acme/widgets"), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending(&state).await, 1);
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let h = Harness::new();
    let state = app(&h).await;

    let status = deliver(&state, "pull_request_review", review_event("alice", "User", "acme/widgets"), "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(pending(&state).await, 0);
}

#[tokio::test]
async fn test_missing_event_header_is_bad_request() {
    let h = Harness::new();
    let state = app(&h).await;

    let body = b"{}".to_vec();
    let mut headers = HeaderMap::new();
    headers.insert(
        SIGNATURE_HEADER,
        HeaderValue::from_str(&sign(WEBHOOK_SECRET, &body).unwrap()).unwrap(),
    );
    let status = handle_webhook(State(state), headers, Bytes::from(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bot_and_foreign_reviews_are_ignored() {
    let h = Harness::new();
    let state = app(&h).await;

    let status = deliver(&state, "pull_request_review", review_event(BOT, "User", "acme/widgets"), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    let status = deliver(&state, "pull_request_review", review_event("ci[bot]", "Bot", "acme/widgets"), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    let status = deliver(&state, "pull_request_review", review_event("alice", "User", "someone/else"), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(pending(&state).await, 0);
}

#[tokio::test]
async fn test_check_suite_enqueues_listed_pull_requests() {
    let h = Harness::new();
    let state = app(&h).await;

    let payload = json!({
        "action": "completed",
        "check_suite": {"head_sha": HEAD_SHA, "conclusion": "success", "pull_requests": [{"number": 7}, {"number": 8}]},
        "repository": {"full_name": "acme/widgets"}
    });
    let status = deliver(&state, "check_suite", payload, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(pending(&state).await, 1);
}

#[tokio::test]
async fn test_status_event_only_wakes_workflows_at_the_gate() {
    let h = Harness::new();
    let state = app(&h).await;
    let payload = json!({
        "sha": HEAD_SHA,
        "state": "success",
        "context": "ci",
        "repository": {"full_name": "acme/widgets"}
    });

    let status = deliver(&state, "status", payload.clone(), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);

    let mut ready = h.store().load("42").unwrap();
    ready.status = WorkflowStatus::ReadyToMerge;
    h.store().save(&ready).unwrap();

    let status = deliver(&state, "status", payload, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_ping_and_unsupported_events() {
    let h = Harness::new();
    let state = app(&h).await;

    assert_eq!(deliver(&state, "ping", json!({"zen": "Keep it simple"}), WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(deliver(&state, "issues", json!({"action": "opened"}), WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(pending(&state).await, 0);
}

#[tokio::test]
async fn test_poll_skips_terminal_workflows() {
    let h = Harness::new();
    let state = app(&h).await;

    let mut done = WorkflowState::new("17", 3, "feature/old", None);
    done.status = WorkflowStatus::Completed;
    h.store().create(&done).unwrap();

    assert_eq!(poll_once(&state).await, 1);
    // A second sweep finds the step still pending
    assert_eq!(poll_once(&state).await, 0);

    let task = state.task_queue.write().await.take_next().unwrap();
    assert_eq!(task.issue_id(), "42");
}
