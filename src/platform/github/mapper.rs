//! Conversions from raw GitHub REST payloads into platform types.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::platform::types::*;

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn login(value: &Value) -> String {
    value["login"].as_str().unwrap_or("unknown").to_string()
}

pub fn map_issue(issue: &octocrab::models::issues::Issue) -> Issue {
    Issue {
        id: issue.number.to_string(),
        title: issue.title.clone(),
        description: issue.body.clone().unwrap_or_default(),
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        assignee: issue.assignee.as_ref().map(|a| a.login.clone()),
    }
}

pub fn map_pull_request(pr: &Value, pushed_at: Option<DateTime<Utc>>) -> PullRequest {
    let state = if pr["merged"].as_bool().unwrap_or(false) || !pr["merged_at"].is_null() {
        PrState::Merged
    } else if pr["state"].as_str() == Some("closed") {
        PrState::Closed
    } else {
        PrState::Open
    };

    PullRequest {
        number: pr["number"].as_u64().unwrap_or(0),
        title: pr["title"].as_str().unwrap_or("").to_string(),
        body: pr["body"].as_str().unwrap_or("").to_string(),
        state,
        head_branch: pr["head"]["ref"].as_str().unwrap_or("").to_string(),
        head_sha: pr["head"]["sha"].as_str().unwrap_or("").to_string(),
        base_branch: pr["base"]["ref"].as_str().unwrap_or("").to_string(),
        draft: pr["draft"].as_bool().unwrap_or(false),
        pushed_at,
        merge_commit_sha: pr["merge_commit_sha"].as_str().map(|s| s.to_string()),
        mergeable: pr["mergeable"].as_bool(),
        mergeable_state: pr["mergeable_state"].as_str().map(|s| s.to_string()),
    }
}

pub fn map_review(review: &Value) -> HostReview {
    let state = match review["state"].as_str().unwrap_or("") {
        "APPROVED" => ReviewState::Approved,
        "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
        "DISMISSED" => ReviewState::Dismissed,
        "PENDING" => ReviewState::Pending,
        _ => ReviewState::Commented,
    };

    HostReview {
        id: review["id"].as_u64().unwrap_or(0),
        author: login(&review["user"]),
        body: review["body"].as_str().unwrap_or("").to_string(),
        state,
        commit_id: review["commit_id"].as_str().map(|s| s.to_string()),
        submitted_at: parse_time(&review["submitted_at"]),
    }
}

pub fn map_review_comment(comment: &Value) -> ReviewComment {
    let id = comment["id"].as_u64().unwrap_or(0);
    ReviewComment {
        id,
        author: login(&comment["user"]),
        body: comment["body"].as_str().unwrap_or("").to_string(),
        path: comment["path"].as_str().map(|s| s.to_string()),
        line: comment["line"]
            .as_u64()
            .or_else(|| comment["original_line"].as_u64())
            .map(|l| l as u32),
        thread_id: comment["in_reply_to_id"].as_u64().unwrap_or(id),
        created_at: parse_time(&comment["created_at"]).unwrap_or_else(Utc::now),
    }
}

/// Map a legacy commit status (`/commits/{sha}/status` entries).
pub fn map_commit_status(status: &Value) -> StatusCheck {
    let state = match status["state"].as_str().unwrap_or("") {
        "success" => CheckState::Success,
        "failure" => CheckState::Failure,
        "error" => CheckState::Error,
        _ => CheckState::Pending,
    };
    StatusCheck {
        name: status["context"].as_str().unwrap_or("").to_string(),
        state,
    }
}

/// Map a check run (`/commits/{sha}/check-runs` entries).
pub fn map_check_run(run: &Value) -> StatusCheck {
    let state = if run["status"].as_str() != Some("completed") {
        CheckState::Pending
    } else {
        match run["conclusion"].as_str().unwrap_or("") {
            "success" => CheckState::Success,
            "neutral" => CheckState::Neutral,
            "skipped" => CheckState::Skipped,
            "cancelled" => CheckState::Cancelled,
            "timed_out" => CheckState::TimedOut,
            "action_required" => CheckState::ActionRequired,
            "failure" | "startup_failure" | "stale" => CheckState::Failure,
            _ => CheckState::Error,
        }
    };
    StatusCheck {
        name: run["name"].as_str().unwrap_or("").to_string(),
        state,
    }
}

pub fn map_branch_protection(protection: &Value) -> BranchProtection {
    let reviews = &protection["required_pull_request_reviews"];
    let checks = &protection["required_status_checks"];

    let required_status_checks = if checks.is_null() {
        None
    } else {
        let mut contexts: Vec<String> = checks["contexts"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|c| c.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        // Newer protection payloads list checks separately from contexts
        if let Some(list) = checks["checks"].as_array() {
            for check in list {
                if let Some(name) = check["context"].as_str() {
                    if !contexts.iter().any(|c| c == name) {
                        contexts.push(name.to_string());
                    }
                }
            }
        }
        Some(RequiredStatusChecks {
            strict: checks["strict"].as_bool().unwrap_or(false),
            contexts,
        })
    };

    BranchProtection {
        required_approving_review_count: reviews["required_approving_review_count"]
            .as_u64()
            .unwrap_or(0) as u32,
        require_code_owner_reviews: reviews["require_code_owner_reviews"]
            .as_bool()
            .unwrap_or(false),
        dismiss_stale_reviews: reviews["dismiss_stale_reviews"].as_bool().unwrap_or(false),
        required_status_checks,
        required_linear_history: protection["required_linear_history"]["enabled"]
            .as_bool()
            .unwrap_or(false),
        enforce_admins: protection["enforce_admins"]["enabled"]
            .as_bool()
            .unwrap_or(false),
    }
}
