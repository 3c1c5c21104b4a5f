use serde::Deserialize;

/// Top-level webhook event parsed from the payload based on X-GitHub-Event header.
#[derive(Debug)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    PullRequestReview(PullRequestReviewEvent),
    CheckSuite(CheckSuiteEvent),
    Status(StatusEvent),
    Ping,
    Unsupported(String),
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestReviewEvent {
    pub action: String,
    pub review: ReviewPayload,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuiteEvent {
    pub action: String,
    pub check_suite: CheckSuitePayload,
    pub repository: RepositoryPayload,
}

/// Commit status events carry no pull request numbers, only the sha.
#[derive(Debug, Deserialize)]
pub struct StatusEvent {
    pub sha: String,
    pub state: String,
    pub context: String,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct ReviewPayload {
    pub id: u64,
    pub state: String, // "approved", "changes_requested", "commented"
    pub user: UserPayload,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuitePayload {
    pub head_sha: String,
    pub conclusion: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestNumber>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestNumber {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    #[serde(default)]
    pub merged: bool,
    pub head: PullRequestRef,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub login: String,
    #[serde(rename = "type", default)]
    pub user_type: String,
}

impl UserPayload {
    pub fn is_bot(&self, bot_login: Option<&str>) -> bool {
        self.user_type == "Bot"
            || self.login.ends_with("[bot]")
            || bot_login.is_some_and(|bot| bot.eq_ignore_ascii_case(&self.login))
    }
}

impl WebhookEvent {
    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match event_type {
            "pull_request" => {
                let event: PullRequestEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::PullRequest(event))
            }
            "pull_request_review" => {
                let event: PullRequestReviewEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::PullRequestReview(event))
            }
            "check_suite" => {
                let event: CheckSuiteEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::CheckSuite(event))
            }
            "status" => {
                let event: StatusEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::Status(event))
            }
            "ping" => Ok(WebhookEvent::Ping),
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }
}
