use std::sync::Arc;

use crate::agent::claude::ClaudeAgent;
use crate::agent::AiAgent;
use crate::config::AppConfig;
use crate::error::Result;
use crate::platform::github::GitHubPlatform;
use crate::platform::timed::Timed;
use crate::platform::{IssueProvider, SourceControlHost};
use crate::state::WorkflowStateStore;
use crate::workspace::{GitWorktreeManager, WorktreeManager};

/// Everything a workflow step needs, built once by the caller and shared.
#[derive(Clone)]
pub struct WorkflowContext {
    pub config: Arc<AppConfig>,
    pub store: WorkflowStateStore,
    pub host: Arc<dyn SourceControlHost>,
    pub issues: Arc<dyn IssueProvider>,
    pub agent: Arc<dyn AiAgent>,
    pub worktrees: Arc<dyn WorktreeManager>,
}

impl WorkflowContext {
    pub fn new(
        config: AppConfig,
        store: WorkflowStateStore,
        host: Arc<dyn SourceControlHost>,
        issues: Arc<dyn IssueProvider>,
        agent: Arc<dyn AiAgent>,
        worktrees: Arc<dyn WorktreeManager>,
    ) -> Self {
        // Every host and tracker call gets the configured bound
        let limit = config.host_timeout();
        Self {
            config: Arc::new(config),
            store,
            host: Arc::new(Timed::new(host, limit)),
            issues: Arc::new(Timed::new(issues, limit)),
            agent,
            worktrees,
        }
    }

    /// GitHub for both issues and pull requests, Claude as the agent and
    /// git worktrees under the configured base directory.
    pub fn live(config: AppConfig) -> Result<Self> {
        let store = WorkflowStateStore::open(&config.state.dir)?;
        let github = Arc::new(GitHubPlatform::new(&config.github)?);
        let agent = Arc::new(ClaudeAgent::new(&config.claude)?);
        let worktrees = Arc::new(GitWorktreeManager::new(&config));

        Ok(Self::new(
            config,
            store,
            github.clone(),
            github,
            agent,
            worktrees,
        ))
    }
}
