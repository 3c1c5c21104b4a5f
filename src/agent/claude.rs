use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::agent::{prompt, AgentContext, AgentResponse, AiAgent};
use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// [`AiAgent`] backed by the Claude Messages API. Agent names select the
/// system prompt.
pub struct ClaudeAgent {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeAgent {
    pub fn new(config: &ClaudeConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AppError::Config("claude.api_key is required".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        Ok(response.json::<MessagesResponse>().await?)
    }
}

/// Rate limits and server errors are transient, anything else is an agent error.
fn classify_status(status: u16, body: &str) -> AppError {
    match status {
        408 | 429 | 500..=599 => {
            AppError::Transient(format!("Claude API returned {status}: {body}"))
        }
        _ => AppError::Agent(format!("Claude API returned {status}: {body}")),
    }
}

#[async_trait]
impl AiAgent for ClaudeAgent {
    async fn invoke(&self, agent: &str, prompt_text: &str, context: &AgentContext) -> Result<AgentResponse> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: prompt::system_prompt(agent, context),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt_text.to_string(),
            }],
        };

        tracing::info!(agent = agent, pr = ?context.pr_number, "Invoking agent");
        let response = self.send_message(&request).await?;

        let text = response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        tracing::debug!(
            agent = agent,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Agent replied"
        );

        if response.stop_reason.as_deref() == Some("max_tokens") {
            return Ok(AgentResponse::failed("Reply truncated at max_tokens"));
        }

        Ok(AgentResponse::ok(text))
    }
}

// --- Request types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(529, "overloaded").is_transient());
        assert!(classify_status(429, "rate limited").is_transient());
        assert!(!classify_status(400, "bad request").is_transient());
        assert!(matches!(classify_status(401, "no"), AppError::Agent(_)));
    }

    #[test]
    fn test_response_skips_non_text_blocks() {
        let raw = r#"{
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "done"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 2}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(&parsed.content[1], ContentBlock::Text { text } if text == "done"));
    }

    #[test]
    fn test_new_requires_api_key() {
        assert!(ClaudeAgent::new(&ClaudeConfig::default()).is_err());
    }
}
