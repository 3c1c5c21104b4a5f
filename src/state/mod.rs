//! Per-issue workflow records and their durable store.

pub mod store;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub use store::{StateLock, WorkflowStateStore};

/// Review cycle status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Created,
    AiReviewing,
    AwaitingHumanReview,
    AddressingComments,
    ReadyToMerge,
    Merging,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Created => "CREATED",
            WorkflowStatus::AiReviewing => "AI_REVIEWING",
            WorkflowStatus::AwaitingHumanReview => "AWAITING_HUMAN_REVIEW",
            WorkflowStatus::AddressingComments => "ADDRESSING_COMMENTS",
            WorkflowStatus::ReadyToMerge => "READY_TO_MERGE",
            WorkflowStatus::Merging => "MERGING",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Edges of the review cycle graph. Every non-terminal status may fail.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Created, AiReviewing)
                | (Created, AwaitingHumanReview)
                | (AiReviewing, AwaitingHumanReview)
                | (AwaitingHumanReview, ReadyToMerge)
                | (AwaitingHumanReview, AddressingComments)
                | (AddressingComments, AiReviewing)
                | (AddressingComments, AwaitingHumanReview)
                | (ReadyToMerge, Merging)
                | (Merging, Completed)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Ai,
    Human,
    AiUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    CommentsPosted,
    Approved,
    ChangesRequested,
    Completed,
}

/// One entry of the append-only review history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub kind: ReviewKind,
    pub timestamp: DateTime<Utc>,
    pub status: ReviewStatus,
    pub reviewer: Option<String>,
    pub comments: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Review {
    pub fn new(kind: ReviewKind, status: ReviewStatus) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            status,
            reviewer: None,
            comments: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = Some(reviewer.into());
        self
    }

    pub fn with_comments(mut self, comments: Vec<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    #[default]
    Unresolved,
    Resolved,
    Dismissed,
}

/// What was kept of the most recent merge gate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSummary {
    pub success: bool,
    pub failed_checks: Vec<String>,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub success: bool,
    pub method: String,
    pub commit_sha: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub conflict_files: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub step: String,
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub at: DateTime<Utc>,
}

/// The durable record of one issue's review cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub issue_id: String,
    pub pr_number: u64,
    pub branch: String,
    pub worktree_path: Option<PathBuf>,
    pub status: WorkflowStatus,
    pub review_iteration: u32,
    pub reviews: Vec<Review>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub blocking_items: Vec<String>,
    #[serde(default)]
    pub last_gate: Option<GateSummary>,
    #[serde(default)]
    pub merge: Option<MergeSummary>,
    #[serde(default)]
    pub comment_resolutions: BTreeMap<u64, ResolutionStatus>,
    /// Host review ids already turned into history entries.
    #[serde(default)]
    pub processed_reviews: Vec<u64>,
    #[serde(default)]
    pub cleanup: Vec<CleanupRecord>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
}

impl WorkflowState {
    pub fn new(
        issue_id: impl Into<String>,
        pr_number: u64,
        branch: impl Into<String>,
        worktree_path: Option<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            issue_id: issue_id.into(),
            pr_number,
            branch: branch.into(),
            worktree_path,
            status: WorkflowStatus::Created,
            review_iteration: 0,
            reviews: Vec::new(),
            created_at: now,
            updated_at: now,
            failure_reason: None,
            blocking_items: Vec::new(),
            last_gate: None,
            merge: None,
            comment_resolutions: BTreeMap::new(),
            processed_reviews: Vec::new(),
            cleanup: Vec::new(),
            status_history: Vec::new(),
        }
    }

    /// Move along one edge of the status graph.
    pub fn transition_to(&mut self, next: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status_history.push(StatusChange {
            from: self.status,
            to: next,
            at: Utc::now(),
        });
        self.status = next;
        Ok(())
    }

    /// Record a terminal failure with an actionable reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition_to(WorkflowStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn append_review(&mut self, review: Review) {
        self.reviews.push(review);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn latest_review(&self, kind: ReviewKind) -> Option<&Review> {
        self.reviews.iter().rev().find(|r| r.kind == kind)
    }

    pub fn has_processed_review(&self, host_review_id: u64) -> bool {
        self.processed_reviews.contains(&host_review_id)
    }

    pub fn resolution_of(&self, thread_id: u64) -> ResolutionStatus {
        self.comment_resolutions
            .get(&thread_id)
            .copied()
            .unwrap_or_default()
    }

    /// Equality that ignores `updated_at`, used to skip no-op saves.
    pub fn same_content(&self, other: &WorkflowState) -> bool {
        let mut a = self.clone();
        a.updated_at = other.updated_at;
        a == *other
    }
}
