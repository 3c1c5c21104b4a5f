use serde::Serialize;

/// Whether a review cycle may proceed to the merge gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionStatus {
    pub ready: bool,
    pub reason: String,
    pub blocking_items: Vec<String>,
}

impl CompletionStatus {
    pub fn ready(reason: impl Into<String>) -> Self {
        Self {
            ready: true,
            reason: reason.into(),
            blocking_items: Vec::new(),
        }
    }

    pub fn blocked(reason: impl Into<String>, blocking_items: Vec<String>) -> Self {
        Self {
            ready: false,
            reason: reason.into(),
            blocking_items,
        }
    }
}
