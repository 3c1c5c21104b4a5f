use crate::state::WorkflowStatus;

/// Why a step was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A code host event touched the workflow's pull request.
    Webhook,
    /// Periodic re-check of every open workflow.
    Poll,
    /// The previous step moved into a status that acts without outside input.
    FollowUp,
}

/// Tasks that can be enqueued for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Step { issue_id: String, trigger: Trigger },
}

impl Task {
    pub fn step(issue_id: impl Into<String>, trigger: Trigger) -> Self {
        Task::Step {
            issue_id: issue_id.into(),
            trigger,
        }
    }

    pub fn issue_id(&self) -> &str {
        match self {
            Task::Step { issue_id, .. } => issue_id,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Task::Step { issue_id, trigger } => format!("Step workflow {issue_id} ({trigger:?})"),
        }
    }
}

/// Statuses whose next step needs no new outside input, so the processor
/// schedules it right away instead of waiting for the next poll.
pub fn acts_immediately(status: WorkflowStatus) -> bool {
    matches!(
        status,
        WorkflowStatus::Created
            | WorkflowStatus::AiReviewing
            | WorkflowStatus::AddressingComments
            | WorkflowStatus::ReadyToMerge
            | WorkflowStatus::Merging
    )
}
