pub mod claude;
pub mod prompt;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::platform::types::NewReviewComment;

/// What the agent is working on, passed alongside the prompt.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub pr_number: Option<u64>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

/// Machine-readable part of an agent reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredChanges {
    pub files: Vec<FileChange>,
    pub comments: Vec<NewReviewComment>,
    pub addressed_threads: Vec<u64>,
    pub out_of_scope_threads: Vec<u64>,
}

impl StructuredChanges {
    /// Parse the last fenced ```json block of a reply. Replies without one,
    /// or with one that does not parse, carry no structured changes.
    pub fn from_reply(text: &str) -> Self {
        let Some(start) = text.rfind("```json") else {
            return Self::default();
        };
        let body = &text[start + "```json".len()..];
        let Some(end) = body.find("```") else {
            return Self::default();
        };

        match serde_json::from_str(body[..end].trim()) {
            Ok(changes) => changes,
            Err(e) => {
                tracing::warn!(error = %e, "Agent reply has an unparseable json block");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.comments.is_empty()
            && self.addressed_threads.is_empty()
            && self.out_of_scope_threads.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub success: bool,
    pub text: String,
    pub structured_changes: StructuredChanges,
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            success: true,
            structured_changes: StructuredChanges::from_reply(&text),
            text,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A language model agent. Callers enforce the timeout.
#[async_trait]
pub trait AiAgent: Send + Sync {
    async fn invoke(&self, agent: &str, prompt: &str, context: &AgentContext) -> Result<AgentResponse>;
}
