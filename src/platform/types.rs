use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue tracked by a review workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    pub fn as_str(self) -> &'static str {
        match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
            PrState::Merged => "merged",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: PrState,
    pub head_branch: String,
    pub head_sha: String,
    pub base_branch: String,
    #[serde(default)]
    pub draft: bool,
    /// When the head commit was pushed, if the host reports it.
    pub pushed_at: Option<DateTime<Utc>>,
    pub merge_commit_sha: Option<String>,
    /// `None` while the host is still computing it.
    pub mergeable: Option<bool>,
    /// Host-specific mergeability summary (`clean`, `behind`, `dirty`, ...).
    pub mergeable_state: Option<String>,
}

impl PullRequest {
    pub fn is_merged(&self) -> bool {
        self.state == PrState::Merged
    }

    pub fn is_behind_base(&self) -> bool {
        self.mergeable_state.as_deref() == Some("behind")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

/// A review as reported by the code host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReview {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub state: ReviewState,
    /// Head commit the review was made against.
    pub commit_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// A line comment on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub path: Option<String>,
    pub line: Option<u32>,
    /// Root comment id of the thread this comment belongs to.
    pub thread_id: u64,
    pub created_at: DateTime<Utc>,
}

/// A line comment to attach to a new review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReviewComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Success,
    Neutral,
    Skipped,
    Pending,
    Failure,
    Error,
    Cancelled,
    TimedOut,
    ActionRequired,
}

impl CheckState {
    pub fn is_passing(self) -> bool {
        matches!(self, CheckState::Success | CheckState::Neutral | CheckState::Skipped)
    }

    pub fn is_pending(self) -> bool {
        self == CheckState::Pending
    }

    pub fn is_failing(self) -> bool {
        !self.is_passing() && !self.is_pending()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckState::Success => "success",
            CheckState::Neutral => "neutral",
            CheckState::Skipped => "skipped",
            CheckState::Pending => "pending",
            CheckState::Failure => "failure",
            CheckState::Error => "error",
            CheckState::Cancelled => "cancelled",
            CheckState::TimedOut => "timed_out",
            CheckState::ActionRequired => "action_required",
        }
    }
}

/// A single status check or check run on the head commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCheck {
    pub name: String,
    pub state: CheckState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequiredStatusChecks {
    /// Branch must be up to date with base before merging.
    pub strict: bool,
    pub contexts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchProtection {
    pub required_approving_review_count: u32,
    pub require_code_owner_reviews: bool,
    pub dismiss_stale_reviews: bool,
    pub required_status_checks: Option<RequiredStatusChecks>,
    pub required_linear_history: bool,
    pub enforce_admins: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "merge" => Ok(MergeMethod::Merge),
            "squash" => Ok(MergeMethod::Squash),
            "rebase" => Ok(MergeMethod::Rebase),
            other => Err(format!("unknown merge method: {other}")),
        }
    }
}

/// Outcome of a host merge call that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResponse {
    Merged {
        sha: Option<String>,
        message: String,
    },
    /// The host refused because the branches conflict. `output` is the raw
    /// conflict report, in host vocabulary.
    Conflict { output: String },
}
