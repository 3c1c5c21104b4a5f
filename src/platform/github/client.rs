use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::{IssueProvider, SourceControlHost};

use super::auth::{generate_app_jwt, Credentials};
use super::mapper;

/// Page size requested from list endpoints; a shorter page is the last one.
const PER_PAGE: usize = 100;

/// Upper bound on pages followed for one listing.
const MAX_PAGES: u32 = 50;

/// Pull every page of a list endpoint. `items` picks the array out of one
/// page's response body.
async fn collect_pages<F, Fut>(mut fetch: F, items: fn(&Value) -> Option<&Vec<Value>>) -> Result<Vec<Value>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut all = Vec::new();
    for page in 1..=MAX_PAGES {
        let response = fetch(page).await?;
        let batch = items(&response).cloned().unwrap_or_default();
        let last = batch.len() < PER_PAGE;
        all.extend(batch);
        if last {
            return Ok(all);
        }
    }
    tracing::warn!(pages = MAX_PAGES, items = all.len(), "Stopped following pages");
    Ok(all)
}

fn check_runs(response: &Value) -> Option<&Vec<Value>> {
    response["check_runs"].as_array()
}

fn statuses(response: &Value) -> Option<&Vec<Value>> {
    response["statuses"].as_array()
}

/// GitHub-backed [`SourceControlHost`] and [`IssueProvider`] for one repository.
pub struct GitHubPlatform {
    owner: String,
    repo: String,
    credentials: Credentials,
    /// Connect and read timeout applied to every request.
    timeout: Duration,
    /// Cached installation token and its expiry (App auth only)
    token_cache: RwLock<Option<(String, chrono::DateTime<chrono::Utc>)>>,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        if config.owner.is_empty() || config.repo.is_empty() {
            return Err(AppError::Config(
                "github.owner and github.repo are required".to_string(),
            ));
        }

        Ok(Self {
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            credentials: Credentials::from_config(config)?,
            timeout: Duration::from_secs(config.request_timeout_secs),
            token_cache: RwLock::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let (app_id, private_key_path, installation_id) = match &self.credentials {
            Credentials::Token(token) => return Ok(token.clone()),
            Credentials::App {
                app_id,
                private_key_path,
                installation_id,
            } => (*app_id, private_key_path, *installation_id),
        };

        {
            let cache = self.token_cache.read().await;
            if let Some((token, expiry)) = cache.as_ref() {
                if *expiry > chrono::Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = generate_app_jwt(app_id, private_key_path)?;
        let client = Octocrab::builder()
            .personal_token(jwt)
            .set_connect_timeout(Some(self.timeout))
            .set_read_timeout(Some(self.timeout))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build JWT client: {e}")))?;

        let url = format!("/app/installations/{installation_id}/access_tokens");
        let response: Value = client.post(&url, None::<&()>).await?;

        let token = response["token"]
            .as_str()
            .ok_or_else(|| AppError::Host {
                status: None,
                message: "No token in installation token response".to_string(),
            })?
            .to_string();

        let expires_at = response["expires_at"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::hours(1));

        *self.token_cache.write().await = Some((token.clone(), expires_at));
        Ok(token)
    }

    async fn client(&self) -> Result<Octocrab> {
        let token = self.access_token().await?;
        Octocrab::builder()
            .personal_token(token)
            .set_connect_timeout(Some(self.timeout))
            .set_read_timeout(Some(self.timeout))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build octocrab client: {e}")))
    }

    fn route(&self, path: &str) -> String {
        format!("/repos/{}/{}{path}", self.owner, self.repo)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let client = self.client().await?;
        Ok(client.get(self.route(path), None::<&()>).await?)
    }

    /// Every item of a paginated listing at `path`.
    async fn get_all(&self, path: &str, items: fn(&Value) -> Option<&Vec<Value>>) -> Result<Vec<Value>> {
        let separator = if path.contains('?') { '&' } else { '?' };
        collect_pages(
            |page| self.get_json_owned(format!("{path}{separator}per_page={PER_PAGE}&page={page}")),
            items,
        )
        .await
    }

    async fn get_json_owned(&self, path: String) -> Result<Value> {
        self.get_json(&path).await
    }

    fn parse_issue_number(issue_id: &str) -> Result<u64> {
        issue_id
            .trim()
            .trim_start_matches('#')
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid GitHub issue id: {issue_id}")))
    }

    /// Commit date of the PR head, used as the last push time.
    async fn head_committed_at(&self, sha: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        let commit = self.get_json(&format!("/commits/{sha}")).await.ok()?;
        commit["commit"]["committer"]["date"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

#[async_trait]
impl SourceControlHost for GitHubPlatform {
    async fn get_pull_request(&self, pr: u64) -> Result<PullRequest> {
        let raw = self.get_json(&format!("/pulls/{pr}")).await?;
        let head_sha = raw["head"]["sha"].as_str().unwrap_or("").to_string();
        let pushed_at = if head_sha.is_empty() {
            None
        } else {
            self.head_committed_at(&head_sha).await
        };
        Ok(mapper::map_pull_request(&raw, pushed_at))
    }

    async fn get_diff(&self, pr: u64) -> Result<String> {
        let client = self.client().await?;
        Ok(client.pulls(&self.owner, &self.repo).get_diff(pr).await?)
    }

    async fn get_reviews(&self, pr: u64) -> Result<Vec<HostReview>> {
        let reviews = self.get_all(&format!("/pulls/{pr}/reviews"), Value::as_array).await?;
        Ok(reviews.iter().map(mapper::map_review).collect())
    }

    async fn get_comments(&self, pr: u64) -> Result<Vec<ReviewComment>> {
        let comments = self.get_all(&format!("/pulls/{pr}/comments"), Value::as_array).await?;
        Ok(comments.iter().map(mapper::map_review_comment).collect())
    }

    async fn post_review(&self, pr: u64, body: &str, comments: &[NewReviewComment]) -> Result<()> {
        let client = self.client().await?;
        let comments: Vec<Value> = comments
            .iter()
            .map(|c| json!({"path": c.path, "line": c.line, "side": "RIGHT", "body": c.body}))
            .collect();
        let payload = json!({
            "body": body,
            "event": "COMMENT",
            "comments": comments,
        });

        let _: Value = client
            .post(self.route(&format!("/pulls/{pr}/reviews")), Some(&payload))
            .await?;

        tracing::info!(pr = pr, comments = comments.len(), "Posted review");
        Ok(())
    }

    async fn get_status_checks(&self, pr: u64) -> Result<Vec<StatusCheck>> {
        let raw = self.get_json(&format!("/pulls/{pr}")).await?;
        let sha = raw["head"]["sha"]
            .as_str()
            .ok_or_else(|| AppError::Host {
                status: None,
                message: format!("PR #{pr} has no head sha"),
            })?
            .to_string();

        let mut checks: Vec<StatusCheck> = self
            .get_all(&format!("/commits/{sha}/status"), statuses)
            .await?
            .iter()
            .map(mapper::map_commit_status)
            .collect();

        let runs = self.get_all(&format!("/commits/{sha}/check-runs"), check_runs).await?;
        checks.extend(runs.iter().map(mapper::map_check_run));

        Ok(checks)
    }

    async fn get_branch_protection(&self, branch: &str) -> Result<Option<BranchProtection>> {
        match self.get_json(&format!("/branches/{branch}/protection")).await {
            Ok(raw) => Ok(Some(mapper::map_branch_protection(&raw))),
            Err(AppError::Host {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn merge(&self, pr: u64, method: MergeMethod) -> Result<MergeResponse> {
        let client = self.client().await?;
        let payload = json!({ "merge_method": method.as_str() });

        let result: std::result::Result<Value, octocrab::Error> = client
            .put(self.route(&format!("/pulls/{pr}/merge")), Some(&payload))
            .await;

        match result {
            Ok(response) => Ok(MergeResponse::Merged {
                sha: response["sha"].as_str().map(|s| s.to_string()),
                message: response["message"].as_str().unwrap_or("").to_string(),
            }),
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 405 => {
                // 405 covers both conflicts and unmet protection rules
                let current = self.get_json(&format!("/pulls/{pr}")).await?;
                if current["mergeable_state"].as_str() == Some("dirty") {
                    Ok(MergeResponse::Conflict {
                        output: source.message,
                    })
                } else {
                    Err(AppError::NonRecoverableHost(source.message))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .repos(&self.owner, &self.repo)
            .delete_ref(&octocrab::params::repos::Reference::Branch(branch.to_string()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IssueProvider for GitHubPlatform {
    async fn fetch(&self, issue_id: &str) -> Result<Issue> {
        let number = Self::parse_issue_number(issue_id)?;
        let client = self.client().await?;
        let issue = client.issues(&self.owner, &self.repo).get(number).await?;
        Ok(mapper::map_issue(&issue))
    }

    async fn close(&self, issue_id: &str, comment: &str) -> Result<()> {
        let number = Self::parse_issue_number(issue_id)?;
        let client = self.client().await?;
        let issues = client.issues(&self.owner, &self.repo);

        issues.create_comment(number, comment).await?;
        issues
            .update(number)
            .state(octocrab::models::IssueState::Closed)
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::merge::validation::latest_verdicts;

    fn raw_review(id: u64, login: &str, state: &str) -> Value {
        json!({
            "id": id,
            "user": {"login": login},
            "body": "",
            "state": state,
            "commit_id": "abc1234",
            "submitted_at": format!("2026-01-01T{:02}:{:02}:00Z", id / 60, id % 60),
        })
    }

    #[tokio::test]
    async fn test_latest_verdict_on_second_page_is_seen() {
        let first: Vec<Value> = (0..100)
            .map(|i| raw_review(i, if i == 0 { "alice" } else { "bob" }, "APPROVED"))
            .collect();
        let second = vec![raw_review(100, "alice", "CHANGES_REQUESTED")];
        let pages = [Value::Array(first), Value::Array(second)];
        let mut requested = Vec::new();

        let raw = collect_pages(
            |page| {
                requested.push(page);
                let body = pages.get(page as usize - 1).cloned().unwrap_or_else(|| json!([]));
                async move { Ok(body) }
            },
            Value::as_array,
        )
        .await
        .unwrap();

        assert_eq!(requested, vec![1, 2]);
        assert_eq!(raw.len(), 101);

        let reviews: Vec<HostReview> = raw.iter().map(mapper::map_review).collect();
        let verdicts = latest_verdicts(&reviews, &AppConfig::default());
        assert_eq!(verdicts["alice"].state, ReviewState::ChangesRequested);
    }

    #[tokio::test]
    async fn test_full_last_page_fetches_one_more() {
        let full: Vec<Value> = (0..PER_PAGE).map(|i| json!({"id": i})).collect();
        let mut calls = 0;
        let runs = collect_pages(
            |page| {
                calls += 1;
                let body = if page == 1 {
                    json!({"check_runs": full.clone()})
                } else {
                    json!({"check_runs": []})
                };
                async move { Ok(body) }
            },
            check_runs,
        )
        .await
        .unwrap();

        assert_eq!(runs.len(), PER_PAGE);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_page_error_propagates() {
        let result = collect_pages(
            |_| async { Err::<Value, _>(AppError::from_status(403, "Forbidden")) },
            Value::as_array,
        )
        .await;
        assert!(matches!(result, Err(AppError::NonRecoverableHost(_))));
    }

    #[test]
    fn test_parse_issue_number() {
        assert_eq!(GitHubPlatform::parse_issue_number("42").unwrap(), 42);
        assert_eq!(GitHubPlatform::parse_issue_number("#42").unwrap(), 42);
        assert!(GitHubPlatform::parse_issue_number("PROJ-1").is_err());
    }

    #[test]
    fn test_new_requires_repo() {
        let config = GitHubConfig {
            token: Some("t".to_string()),
            ..Default::default()
        };
        assert!(GitHubPlatform::new(&config).is_err());
    }

    #[test]
    fn test_route_prefix() {
        let config = GitHubConfig {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            token: Some("t".to_string()),
            ..Default::default()
        };
        let platform = GitHubPlatform::new(&config).unwrap();
        assert_eq!(platform.route("/pulls/3"), "/repos/acme/widgets/pulls/3");
    }
}
