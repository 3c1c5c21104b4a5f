use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::platform::types::MergeMethod;

/// Immutable, validated configuration. Built once by [`AppConfig::load`] and
/// shared read-only afterwards.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    /// Personal or fine-grained token. Takes precedence over App auth.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub app_id: Option<u64>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub installation_id: Option<u64>,
    #[serde(default)]
    pub webhook_secret: String,
    /// Login the bot posts reviews as; its reviews never count as approvals.
    #[serde(default)]
    pub bot_login: Option<String>,
    /// Bound on each code host request, connect and read included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

// Manual Debug impl to avoid leaking the token and webhook secret
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("app_id", &self.app_id)
            .field("private_key_path", &self.private_key_path)
            .field("installation_id", &self.installation_id)
            .field("webhook_secret", &"[REDACTED]")
            .field("bot_login", &self.bot_login)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_review_agent")]
    pub review_agent: String,
    #[serde(default = "default_coder_agent")]
    pub update_agent: String,
    #[serde(default = "default_coder_agent")]
    pub conflict_agent: String,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("review_agent", &self.review_agent)
            .field("update_agent", &self.update_agent)
            .field("conflict_agent", &self.conflict_agent)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Main checkout that worktrees are attached to.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    #[serde(default = "default_worktree_dir")]
    pub worktree_base_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    /// Days a COMPLETED record is kept before purge. Zero keeps them forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReviewConfig {
    #[serde(default = "default_true")]
    pub ai_review_first: bool,
    /// After addressing comments, go back through AI review instead of
    /// straight to human review.
    #[serde(default = "default_true")]
    pub ai_review_on_update: bool,
    #[serde(default = "default_max_review_iterations")]
    pub max_review_iterations: u32,
    #[serde(default = "default_required_approvals")]
    pub required_approvals: u32,
    #[serde(default)]
    pub required_reviewers: Vec<String>,
    #[serde(default = "default_true")]
    pub dismiss_stale_reviews: bool,
    /// Comments at or above this priority block completion while unresolved.
    #[serde(default = "default_blocking_priority")]
    pub blocking_priority: u8,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MergeConfig {
    #[serde(default)]
    pub method: MergeMethod,
    /// Overrides the contexts required by branch protection when set.
    #[serde(default)]
    pub required_status_checks: Option<Vec<String>>,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    #[serde(default = "default_check_poll_interval")]
    pub check_poll_interval_secs: u64,
    #[serde(default = "default_merge_retry_attempts")]
    pub merge_retry_attempts: u32,
    #[serde(default = "default_merge_retry_delay")]
    pub merge_retry_delay_secs: u64,
    #[serde(default)]
    pub admin_override: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    #[serde(default = "default_true")]
    pub close_issue: bool,
    #[serde(default = "default_true")]
    pub delete_remote_branch: bool,
    #[serde(default = "default_true")]
    pub delete_local_branch: bool,
    #[serde(default = "default_true")]
    pub remove_worktree: bool,
    #[serde(default)]
    pub purge_completed: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_agent_timeout() -> u64 {
    300
}

fn default_review_agent() -> String {
    "pull-request-reviewer".to_string()
}

fn default_coder_agent() -> String {
    "coder".to_string()
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from("../worktrees")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".hypha/state")
}

fn default_retention_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_review_iterations() -> u32 {
    10
}

fn default_required_approvals() -> u32 {
    1
}

fn default_blocking_priority() -> u8 {
    70
}

fn default_poll_interval() -> u64 {
    60
}

fn default_check_timeout() -> u64 {
    600
}

fn default_check_poll_interval() -> u64 {
    15
}

fn default_merge_retry_attempts() -> u32 {
    3
}

fn default_merge_retry_delay() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token: None,
            app_id: None,
            private_key_path: None,
            installation_id: None,
            webhook_secret: String::new(),
            bot_login: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_agent_timeout(),
            review_agent: default_review_agent(),
            update_agent: default_coder_agent(),
            conflict_agent: default_coder_agent(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            worktree_base_dir: default_worktree_dir(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            ai_review_first: true,
            ai_review_on_update: true,
            max_review_iterations: default_max_review_iterations(),
            required_approvals: default_required_approvals(),
            required_reviewers: Vec::new(),
            dismiss_stale_reviews: true,
            blocking_priority: default_blocking_priority(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            method: MergeMethod::default(),
            required_status_checks: None,
            check_timeout_secs: default_check_timeout(),
            check_poll_interval_secs: default_check_poll_interval(),
            merge_retry_attempts: default_merge_retry_attempts(),
            merge_retry_delay_secs: default_merge_retry_delay(),
            admin_override: false,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            close_issue: true,
            delete_remote_branch: true,
            delete_local_branch: true,
            remove_worktree: true,
            purge_completed: false,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> Result<()> {
    if value < min || value > max {
        return Err(AppError::Config(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("hypha").required(false));
        }

        // Environment variable overrides with HYPHA_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("HYPHA")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Range checks applied once at construction time.
    pub fn validate(&self) -> Result<()> {
        let review = &self.review;
        check_range("review.max_review_iterations", review.max_review_iterations, 1, 50)?;
        check_range("review.required_approvals", review.required_approvals, 0, 20)?;
        check_range("review.blocking_priority", review.blocking_priority, 0, 100)?;
        check_range("review.poll_interval_secs", review.poll_interval_secs, 1, 3600)?;

        let merge = &self.merge;
        check_range("merge.check_timeout_secs", merge.check_timeout_secs, 0, 7200)?;
        check_range("merge.check_poll_interval_secs", merge.check_poll_interval_secs, 1, 600)?;
        check_range("merge.merge_retry_attempts", merge.merge_retry_attempts, 0, 10)?;
        check_range("merge.merge_retry_delay_secs", merge.merge_retry_delay_secs, 0, 300)?;

        check_range("claude.timeout_secs", self.claude.timeout_secs, 1, 3600)?;
        check_range("github.request_timeout_secs", self.github.request_timeout_secs, 1, 600)?;

        if review.required_reviewers.iter().any(|r| r.trim().is_empty()) {
            return Err(AppError::Config(
                "review.required_reviewers must not contain empty names".to_string(),
            ));
        }

        Ok(())
    }

    pub fn webhook_secret(&self) -> &str {
        &self.github.webhook_secret
    }

    pub fn claude_api_key(&self) -> &str {
        &self.claude.api_key
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.claude.timeout_secs)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.github.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.review.poll_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.merge.check_timeout_secs)
    }

    pub fn check_poll_interval(&self) -> Duration {
        Duration::from_secs(self.merge.check_poll_interval_secs)
    }

    pub fn merge_retry_delay(&self) -> Duration {
        Duration::from_secs(self.merge.merge_retry_delay_secs)
    }

    /// `None` when `retention_days` is zero.
    pub fn retention(&self) -> Option<chrono::Duration> {
        match self.state.retention_days {
            0 => None,
            days => Some(chrono::Duration::days(i64::from(days))),
        }
    }
}
