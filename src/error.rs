use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),

    /// Network, rate limit, timeout or 5xx. Retried by the owning component,
    /// never written into workflow state.
    #[error("Transient external error: {0}")]
    Transient(String),

    #[error("Code host error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Host { status: Option<u16>, message: String },

    /// Permission denied or protection re-violation. Terminal for a merge.
    #[error("Non-recoverable host error: {0}")]
    NonRecoverableHost(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Merge conflict detected: {0}")]
    ConflictDetected(String),

    #[error("Review iteration limit exceeded ({iterations}/{max})")]
    IterationLimitExceeded { iterations: u32, max: u32 },

    /// The record is left on disk untouched for an operator to inspect.
    #[error("State record {} is corrupted: {reason}", .path.display())]
    StateCorrupted { path: PathBuf, reason: String },

    #[error("State record for {0} is locked by another step")]
    StateLocked(String),

    #[error("No workflow found for {0}")]
    WorkflowNotFound(String),

    #[error("Illegal workflow transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short tag printed by the CLI as `error[<category>]`.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Transient(_) => "transient",
            AppError::Http(_) if self.is_transient() => "transient",
            AppError::Host { .. } if self.is_transient() => "transient",
            AppError::Host { .. } | AppError::Http(_) => "host",
            AppError::NonRecoverableHost(_) => "non_recoverable",
            AppError::Validation(_) => "validation",
            AppError::ConflictDetected(_) => "conflict",
            AppError::IterationLimitExceeded { .. } => "iteration_limit",
            AppError::StateCorrupted { .. } => "state_corrupted",
            AppError::StateLocked(_) => "state_locked",
            AppError::WorkflowNotFound(_) => "not_found",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Config(_) => "config",
            AppError::WebhookVerification(_) => "webhook",
            AppError::Git(_) | AppError::Workspace(_) => "workspace",
            AppError::Agent(_) => "agent",
            AppError::Serialization(_) | AppError::Io(_) | AppError::Internal(_) => "internal",
        }
    }

    /// Process exit code for the CLI, stable per category.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            "transient" => 75,
            "validation" => 3,
            "conflict" => 4,
            "iteration_limit" => 5,
            "state_corrupted" => 6,
            "non_recoverable" => 7,
            "state_locked" => 8,
            "not_found" => 9,
            "invalid_transition" => 10,
            "config" => 78,
            _ => 1,
        }
    }

    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transient(_) => true,
            AppError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            AppError::Host { status, .. } => {
                matches!(status, Some(s) if *s == 429 || *s >= 500)
            }
            _ => false,
        }
    }

    /// Classify an HTTP status returned by an external service.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => AppError::NonRecoverableHost(message),
            408 | 429 | 500..=599 => AppError::Transient(format!("HTTP {status}: {message}")),
            _ => AppError::Host {
                status: Some(status),
                message,
            },
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        match &e {
            octocrab::Error::GitHub { source, .. } => {
                AppError::from_status(source.status_code.as_u16(), source.message.clone())
            }
            octocrab::Error::Hyper { .. } | octocrab::Error::Service { .. } => {
                AppError::Transient(e.to_string())
            }
            _ => AppError::Host {
                status: None,
                message: e.to_string(),
            },
        }
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(AppError::from_status(503, "unavailable").is_transient());
        assert!(AppError::from_status(429, "slow down").is_transient());
        assert!(matches!(
            AppError::from_status(403, "forbidden"),
            AppError::NonRecoverableHost(_)
        ));
        let not_found = AppError::from_status(404, "missing");
        assert!(!not_found.is_transient());
        assert_eq!(not_found.category(), "host");
    }

    #[test]
    fn test_categories_have_distinct_exit_codes() {
        let corrupted = AppError::StateCorrupted {
            path: PathBuf::from("x.json"),
            reason: "bad".to_string(),
        };
        assert_eq!(corrupted.category(), "state_corrupted");
        assert_ne!(
            corrupted.exit_code(),
            AppError::Validation("x".into()).exit_code()
        );
        assert_eq!(AppError::Transient("t".into()).exit_code(), 75);
    }

    #[test]
    fn test_host_display_includes_status() {
        let err = AppError::Host {
            status: Some(422),
            message: "unprocessable".to_string(),
        };
        assert_eq!(err.to_string(), "Code host error (422): unprocessable");
    }
}
