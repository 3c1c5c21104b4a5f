//! The merge gate.
//!
//! Every check is a pure function of a [`GateSnapshot`] and the configuration,
//! so the checks are independent of each other and of their order. The gate
//! always runs all of them and reports every actionable item at once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::Result;
use crate::platform::types::{
    BranchProtection, CheckState, HostReview, MergeMethod, PrState, PullRequest, ReviewState,
    StatusCheck,
};
use crate::platform::SourceControlHost;
use crate::state::GateSummary;

/// Everything the checks look at, fetched once per gate run.
#[derive(Debug, Clone)]
pub struct GateSnapshot {
    pub pr: PullRequest,
    pub reviews: Vec<HostReview>,
    pub checks: Vec<StatusCheck>,
    pub protection: Option<BranchProtection>,
    /// How long pending checks were polled before the snapshot was taken.
    pub waited: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub name: &'static str,
    pub success: bool,
    pub message: String,
    pub details: serde_json::Value,
    /// One actionable remediation per violation.
    pub items: Vec<String>,
}

impl ValidationResult {
    fn from_items(name: &'static str, items: Vec<String>, details: serde_json::Value, ok_message: &str) -> Self {
        let success = items.is_empty();
        let message = if success {
            ok_message.to_string()
        } else {
            format!("{} blocking item(s)", items.len())
        };
        Self {
            name,
            success,
            message,
            details,
            items,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeGateResult {
    pub success: bool,
    pub results: Vec<ValidationResult>,
}

impl MergeGateResult {
    /// Actionable items of every failing check, in check order.
    pub fn items(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .flat_map(|r| r.items.iter().cloned())
            .collect()
    }

    pub fn failed_checks(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.name.to_string())
            .collect()
    }

    pub fn failure_message(&self) -> String {
        self.items().join("; ")
    }

    pub fn summary(&self) -> GateSummary {
        GateSummary {
            success: self.success,
            failed_checks: self.failed_checks(),
            item_count: self.items().len(),
        }
    }
}

pub type Check = fn(&GateSnapshot, &AppConfig) -> ValidationResult;

/// Gate checks in declaration order.
pub const CHECKS: [(&str, Check); 4] = [
    ("pull_request", validate_pr_state),
    ("reviews", validate_reviews),
    ("status_checks", validate_status_checks),
    ("branch_protection", validate_branch_protection),
];

/// Run every check. Never short-circuits.
pub fn evaluate(snapshot: &GateSnapshot, config: &AppConfig) -> MergeGateResult {
    let results: Vec<ValidationResult> = CHECKS.iter().map(|(_, check)| check(snapshot, config)).collect();
    MergeGateResult {
        success: results.iter().all(|r| r.success),
        results,
    }
}

pub fn is_bot(author: &str, config: &AppConfig) -> bool {
    config
        .github
        .bot_login
        .as_deref()
        .is_some_and(|bot| bot.eq_ignore_ascii_case(author))
}

/// Made against an older head, or before the latest push.
pub fn is_stale(review: &HostReview, pr: &PullRequest) -> bool {
    let other_commit = review.commit_id.as_deref().is_some_and(|c| c != pr.head_sha);
    let before_push = matches!(
        (review.submitted_at, pr.pushed_at),
        (Some(submitted), Some(pushed)) if submitted < pushed
    );
    other_commit || before_push
}

/// Each human reviewer's latest approve/request-changes/dismiss verdict.
pub fn latest_verdicts<'a>(reviews: &'a [HostReview], config: &AppConfig) -> BTreeMap<&'a str, &'a HostReview> {
    let mut ordered: Vec<&HostReview> = reviews
        .iter()
        .filter(|r| !matches!(r.state, ReviewState::Commented | ReviewState::Pending))
        .filter(|r| !is_bot(&r.author, config))
        .collect();
    ordered.sort_by_key(|r| r.submitted_at);

    ordered.into_iter().fold(BTreeMap::new(), |mut acc, r| {
        acc.insert(r.author.as_str(), r);
        acc
    })
}

/// The pull request itself must be open, out of draft and free of
/// conflicts. Mergeability the host has not computed yet does not block.
pub fn validate_pr_state(snapshot: &GateSnapshot, _config: &AppConfig) -> ValidationResult {
    let pr = &snapshot.pr;
    let mut items = Vec::new();

    if pr.state != PrState::Open {
        items.push(format!(
            "Pull request #{} is {}; only open pull requests can be merged",
            pr.number,
            pr.state.as_str()
        ));
    }
    if pr.draft {
        items.push(format!("Pull request #{} is a draft; mark it ready for review", pr.number));
    }
    if pr.mergeable == Some(false) {
        items.push(format!(
            "Pull request #{} has conflicts with '{}'; resolve them and push",
            pr.number, pr.base_branch
        ));
    }

    let details = json!({
        "state": pr.state.as_str(),
        "draft": pr.draft,
        "mergeable": pr.mergeable,
        "mergeable_state": pr.mergeable_state,
    });
    ValidationResult::from_items("pull_request", items, details, "Pull request can be merged")
}

/// Approvals that count, plus the stale ones that were discarded.
struct Tally<'a> {
    approving: Vec<&'a str>,
    stale: Vec<&'a str>,
    changes_requested: Vec<&'a str>,
}

fn tally<'a>(snapshot: &'a GateSnapshot, config: &AppConfig, dismiss_stale: bool) -> Tally<'a> {
    let mut tally = Tally {
        approving: Vec::new(),
        stale: Vec::new(),
        changes_requested: Vec::new(),
    };
    for (author, review) in latest_verdicts(&snapshot.reviews, config) {
        match review.state {
            ReviewState::Approved if dismiss_stale && is_stale(review, &snapshot.pr) => tally.stale.push(author),
            ReviewState::Approved => tally.approving.push(author),
            ReviewState::ChangesRequested => tally.changes_requested.push(author),
            _ => {}
        }
    }
    tally
}

/// Approval count, outstanding change requests, stale approvals and
/// required reviewers.
pub fn validate_reviews(snapshot: &GateSnapshot, config: &AppConfig) -> ValidationResult {
    let review = &config.review;
    let tally = tally(snapshot, config, review.dismiss_stale_reviews);
    let mut items = Vec::new();

    for reviewer in &tally.stale {
        items.push(format!(
            "Approval from @{reviewer} predates the latest push; request a re-review"
        ));
    }

    let approvals = tally.approving.len() as u32;
    if approvals < review.required_approvals {
        items.push(format!(
            "Needs {} more approving review(s) ({approvals} of {} required)",
            review.required_approvals - approvals,
            review.required_approvals
        ));
    }

    for reviewer in &tally.changes_requested {
        items.push(format!(
            "@{reviewer} requested changes; address them and request a re-review"
        ));
    }

    let missing: Vec<String> = review
        .required_reviewers
        .iter()
        .filter(|r| !tally.approving.iter().any(|a| a.eq_ignore_ascii_case(r)))
        .map(|r| format!("@{r}"))
        .collect();
    if !missing.is_empty() {
        items.push(format!(
            "Missing approval from required reviewer(s): {}",
            missing.join(", ")
        ));
    }

    let details = json!({
        "approval_count": approvals,
        "required_approvals": review.required_approvals,
        "approving_reviewers": tally.approving,
        "changes_requested_by": tally.changes_requested,
        "stale_reviewers": tally.stale,
    });
    ValidationResult::from_items("reviews", items, details, "Review requirements met")
}

/// Worst reported state for a check name: failing, then pending, then passing.
fn effective_state(checks: &[StatusCheck], name: &str) -> Option<CheckState> {
    let states: Vec<CheckState> = checks.iter().filter(|c| c.name == name).map(|c| c.state).collect();
    states
        .iter()
        .copied()
        .find(|s| s.is_failing())
        .or_else(|| states.iter().copied().find(|s| s.is_pending()))
        .or_else(|| states.first().copied())
}

/// Required check names: explicit override, else branch protection contexts.
/// `None` means every reported check counts.
pub fn required_checks(snapshot: &GateSnapshot, config: &AppConfig) -> Option<Vec<String>> {
    config.merge.required_status_checks.clone().or_else(|| {
        snapshot
            .protection
            .as_ref()
            .and_then(|p| p.required_status_checks.as_ref())
            .map(|r| r.contexts.clone())
    })
}

fn checks_to_evaluate(snapshot: &GateSnapshot, config: &AppConfig) -> (Vec<String>, bool) {
    match required_checks(snapshot, config) {
        Some(required) => (required, true),
        None => {
            let names: BTreeSet<String> = snapshot.checks.iter().map(|c| c.name.clone()).collect();
            (names.into_iter().collect(), false)
        }
    }
}

/// Whether any check the gate cares about is still pending.
pub fn has_pending(snapshot: &GateSnapshot, config: &AppConfig) -> bool {
    let (names, _) = checks_to_evaluate(snapshot, config);
    names
        .iter()
        .any(|n| effective_state(&snapshot.checks, n).is_some_and(CheckState::is_pending))
}

/// Required checks must be green. Absent and still-pending ones fail.
pub fn validate_status_checks(snapshot: &GateSnapshot, config: &AppConfig) -> ValidationResult {
    let (names, explicit) = checks_to_evaluate(snapshot, config);
    let mut items = Vec::new();
    let mut passing = Vec::new();
    let mut failing = Vec::new();
    let mut pending = Vec::new();
    let mut missing = Vec::new();

    for name in &names {
        match effective_state(&snapshot.checks, name) {
            None => {
                items.push(format!("Required status check '{name}' has not reported"));
                missing.push(name.as_str());
            }
            Some(state) if state.is_passing() => passing.push(name.as_str()),
            Some(state) if state.is_pending() => {
                items.push(format!(
                    "Status check '{name}' still pending after {}s",
                    snapshot.waited.as_secs()
                ));
                pending.push(name.as_str());
            }
            Some(state) => {
                items.push(format!(
                    "Status check '{name}' is {}; fix it and re-run",
                    state.as_str()
                ));
                failing.push(name.as_str());
            }
        }
    }

    let details = json!({
        "required": if explicit { Some(&names) } else { None },
        "passing": passing,
        "failing": failing,
        "pending": pending,
        "missing": missing,
    });
    ValidationResult::from_items("status_checks", items, details, "Status checks passing")
}

/// Recompute each protection rule on the snapshot.
fn protection_violations(protection: &BranchProtection, snapshot: &GateSnapshot, config: &AppConfig) -> Vec<String> {
    let mut violations = Vec::new();

    let dismiss_stale = protection.dismiss_stale_reviews || config.review.dismiss_stale_reviews;
    let approvals = tally(snapshot, config, dismiss_stale).approving.len() as u32;
    if approvals < protection.required_approving_review_count {
        violations.push(format!(
            "Branch protection requires {} approving review(s); found {approvals}",
            protection.required_approving_review_count
        ));
    }

    if let Some(required) = &protection.required_status_checks {
        for context in &required.contexts {
            let green = effective_state(&snapshot.checks, context).is_some_and(CheckState::is_passing);
            if !green {
                violations.push(format!(
                    "Branch protection requires status check '{context}' to pass"
                ));
            }
        }
        if required.strict && snapshot.pr.is_behind_base() {
            violations.push(format!(
                "Branch protection requires the branch to be up to date with '{}'; update it",
                snapshot.pr.base_branch
            ));
        }
    }

    if protection.required_linear_history && config.merge.method == MergeMethod::Merge {
        violations.push(
            "Branch protection requires linear history; use the squash or rebase merge method".to_string(),
        );
    }

    violations
}

/// Cross-check the host's protection rules. An admin override bypasses
/// violations only when configured and the rules do not bind admins.
pub fn validate_branch_protection(snapshot: &GateSnapshot, config: &AppConfig) -> ValidationResult {
    let Some(protection) = &snapshot.protection else {
        return ValidationResult {
            name: "branch_protection",
            success: true,
            message: "Branch is not protected".to_string(),
            details: json!({ "protected": false }),
            items: Vec::new(),
        };
    };

    let violations = protection_violations(protection, snapshot, config);
    let mut details = json!({
        "protected": true,
        "required_approving_review_count": protection.required_approving_review_count,
        "require_code_owner_reviews": protection.require_code_owner_reviews,
        "enforce_admins": protection.enforce_admins,
        "required_linear_history": protection.required_linear_history,
    });

    if !violations.is_empty() && config.merge.admin_override && !protection.enforce_admins {
        tracing::warn!(
            pr = snapshot.pr.number,
            violations = violations.len(),
            "Bypassing branch protection with admin override"
        );
        details["overridden"] = json!(violations);
        return ValidationResult {
            name: "branch_protection",
            success: true,
            message: format!("Bypassed {} protection violation(s) with admin override", violations.len()),
            details,
            items: Vec::new(),
        };
    }

    ValidationResult::from_items("branch_protection", violations, details, "Branch protection satisfied")
}

/// Gathers the snapshot from the host and evaluates the gate.
pub struct MergeValidationPipeline {
    host: Arc<dyn SourceControlHost>,
    config: Arc<AppConfig>,
}

impl MergeValidationPipeline {
    pub fn new(host: Arc<dyn SourceControlHost>, config: Arc<AppConfig>) -> Self {
        Self { host, config }
    }

    /// Fetch everything the gate needs. Pending checks are re-polled until
    /// they settle or `check_timeout` runs out.
    pub async fn gather(&self, pr_number: u64) -> Result<GateSnapshot> {
        let pr = self.host.get_pull_request(pr_number).await?;
        let reviews = self.host.get_reviews(pr_number).await?;
        let protection = self.host.get_branch_protection(&pr.base_branch).await?;
        let checks = self.host.get_status_checks(pr_number).await?;

        let mut snapshot = GateSnapshot {
            pr,
            reviews,
            checks,
            protection,
            waited: Duration::ZERO,
        };

        let timeout = self.config.check_timeout();
        let interval = self.config.check_poll_interval();
        let started = Instant::now();
        while has_pending(&snapshot, &self.config) && started.elapsed() + interval <= timeout {
            tracing::debug!(pr = pr_number, "Waiting for pending status checks");
            tokio::time::sleep(interval).await;
            snapshot.checks = self.host.get_status_checks(pr_number).await?;
            snapshot.waited = started.elapsed();
        }

        Ok(snapshot)
    }

    pub async fn run(&self, pr_number: u64) -> Result<MergeGateResult> {
        let snapshot = self.gather(pr_number).await?;
        let gate = evaluate(&snapshot, &self.config);

        if gate.success {
            tracing::info!(pr = pr_number, "Merge gate passed");
        } else {
            tracing::info!(
                pr = pr_number,
                failed = ?gate.failed_checks(),
                items = gate.items().len(),
                "Merge gate blocked"
            );
        }
        Ok(gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::types::RequiredStatusChecks;
    use chrono::{TimeZone, Utc};

    fn pr() -> PullRequest {
        PullRequest {
            number: 7,
            title: "Add feature".to_string(),
            body: String::new(),
            state: PrState::Open,
            head_branch: "feature".to_string(),
            head_sha: "abc1234".to_string(),
            base_branch: "main".to_string(),
            draft: false,
            pushed_at: Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()),
            merge_commit_sha: None,
            mergeable: Some(true),
            mergeable_state: Some("clean".to_string()),
        }
    }

    fn review(id: u64, author: &str, state: ReviewState, hour: u32) -> HostReview {
        HostReview {
            id,
            author: author.to_string(),
            body: String::new(),
            state,
            commit_id: Some("abc1234".to_string()),
            submitted_at: Some(Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap()),
        }
    }

    fn check(name: &str, state: CheckState) -> StatusCheck {
        StatusCheck {
            name: name.to_string(),
            state,
        }
    }

    fn snapshot(reviews: Vec<HostReview>, checks: Vec<StatusCheck>) -> GateSnapshot {
        GateSnapshot {
            pr: pr(),
            reviews,
            checks,
            protection: None,
            waited: Duration::ZERO,
        }
    }

    #[test]
    fn test_all_green_passes_with_no_items() {
        let snap = snapshot(
            vec![review(1, "alice", ReviewState::Approved, 13)],
            vec![check("ci", CheckState::Success), check("lint", CheckState::Neutral)],
        );
        let gate = evaluate(&snap, &AppConfig::default());
        assert!(gate.success);
        assert!(gate.items().is_empty());
        assert_eq!(gate.results.len(), 4);
    }

    #[test]
    fn test_reports_every_failure_at_once() {
        let snap = snapshot(
            vec![],
            vec![
                check("ci", CheckState::Failure),
                check("lint", CheckState::TimedOut),
                check("docs", CheckState::Success),
            ],
        );
        let gate = evaluate(&snap, &AppConfig::default());
        assert!(!gate.success);
        assert_eq!(gate.items().len(), 3);
        assert_eq!(gate.failed_checks(), vec!["reviews", "status_checks"]);
        assert!(gate.failure_message().contains("Needs 1 more approving review"));
    }

    #[test]
    fn test_draft_or_conflicting_pull_request_blocks() {
        let mut snap = snapshot(vec![review(1, "alice", ReviewState::Approved, 13)], vec![]);
        snap.pr.draft = true;
        snap.pr.mergeable = Some(false);

        let gate = evaluate(&snap, &AppConfig::default());
        assert!(!gate.success);
        assert_eq!(gate.failed_checks(), vec!["pull_request"]);
        assert_eq!(
            gate.items(),
            vec![
                "Pull request #7 is a draft; mark it ready for review".to_string(),
                "Pull request #7 has conflicts with 'main'; resolve them and push".to_string(),
            ]
        );
    }

    #[test]
    fn test_closed_pull_request_blocks() {
        let mut snap = snapshot(vec![], vec![]);
        snap.pr.state = PrState::Closed;
        let result = validate_pr_state(&snap, &AppConfig::default());
        assert_eq!(
            result.items,
            vec!["Pull request #7 is closed; only open pull requests can be merged"]
        );
    }

    #[test]
    fn test_unknown_mergeability_does_not_block() {
        let mut snap = snapshot(vec![], vec![]);
        snap.pr.mergeable = None;
        let result = validate_pr_state(&snap, &AppConfig::default());
        assert!(result.success);
        assert!(result.details["mergeable"].is_null());
    }

    #[test]
    fn test_latest_verdict_per_reviewer_counts() {
        let snap = snapshot(
            vec![
                review(1, "alice", ReviewState::ChangesRequested, 13),
                review(2, "alice", ReviewState::Approved, 14),
                review(3, "bob", ReviewState::Approved, 13),
                review(4, "bob", ReviewState::Commented, 15),
            ],
            vec![],
        );
        let result = validate_reviews(&snap, &AppConfig::default());
        assert!(result.success);
        assert_eq!(result.details["approval_count"], 2);
    }

    #[test]
    fn test_changes_requested_blocks_even_with_enough_approvals() {
        let snap = snapshot(
            vec![
                review(1, "alice", ReviewState::Approved, 13),
                review(2, "bob", ReviewState::ChangesRequested, 13),
            ],
            vec![],
        );
        let result = validate_reviews(&snap, &AppConfig::default());
        assert!(!result.success);
        assert_eq!(result.items, vec!["@bob requested changes; address them and request a re-review"]);
    }

    #[test]
    fn test_stale_approval_is_discarded() {
        let mut old = review(1, "alice", ReviewState::Approved, 11);
        old.commit_id = Some("0000000".to_string());
        let snap = snapshot(vec![old], vec![]);

        let result = validate_reviews(&snap, &AppConfig::default());
        assert_eq!(result.items.len(), 2);
        assert!(result.items[0].contains("predates the latest push"));

        let mut config = AppConfig::default();
        config.review.dismiss_stale_reviews = false;
        assert!(validate_reviews(&snap, &config).success);
    }

    #[test]
    fn test_bot_approval_does_not_count() {
        let mut config = AppConfig::default();
        config.github.bot_login = Some("hypha-bot".to_string());
        let snap = snapshot(vec![review(1, "hypha-bot", ReviewState::Approved, 13)], vec![]);
        assert!(!validate_reviews(&snap, &config).success);
    }

    #[test]
    fn test_required_reviewer_missing() {
        let mut config = AppConfig::default();
        config.review.required_reviewers = vec!["carol".to_string()];
        let snap = snapshot(vec![review(1, "alice", ReviewState::Approved, 13)], vec![]);
        let result = validate_reviews(&snap, &config);
        assert_eq!(result.items, vec!["Missing approval from required reviewer(s): @carol"]);
    }

    #[test]
    fn test_required_check_absent_or_pending_fails() {
        let mut config = AppConfig::default();
        config.merge.required_status_checks = Some(vec!["ci".to_string(), "deploy".to_string()]);
        let mut snap = snapshot(vec![], vec![check("ci", CheckState::Pending)]);
        snap.waited = Duration::from_secs(600);

        let result = validate_status_checks(&snap, &config);
        assert_eq!(
            result.items,
            vec![
                "Status check 'ci' still pending after 600s".to_string(),
                "Required status check 'deploy' has not reported".to_string(),
            ]
        );
        assert!(has_pending(&snap, &config));
    }

    #[test]
    fn test_failing_entry_wins_over_passing_duplicate() {
        let snap = snapshot(
            vec![],
            vec![check("ci", CheckState::Success), check("ci", CheckState::Failure)],
        );
        assert_eq!(effective_state(&snap.checks, "ci"), Some(CheckState::Failure));
    }

    fn protected() -> BranchProtection {
        BranchProtection {
            required_approving_review_count: 2,
            required_status_checks: Some(RequiredStatusChecks {
                strict: true,
                contexts: vec!["ci".to_string()],
            }),
            required_linear_history: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_protection_violations_are_listed() {
        let mut snap = snapshot(
            vec![review(1, "alice", ReviewState::Approved, 13)],
            vec![check("ci", CheckState::Success)],
        );
        snap.protection = Some(protected());
        snap.pr.mergeable_state = Some("behind".to_string());
        let mut config = AppConfig::default();
        config.merge.method = MergeMethod::Merge;

        let result = validate_branch_protection(&snap, &config);
        assert!(!result.success);
        assert_eq!(result.items.len(), 3);
    }

    #[test]
    fn test_admin_override_respects_enforce_admins() {
        let mut snap = snapshot(vec![review(1, "alice", ReviewState::Approved, 13)], vec![]);
        snap.protection = Some(protected());
        let mut config = AppConfig::default();
        config.merge.admin_override = true;

        let bypassed = validate_branch_protection(&snap, &config);
        assert!(bypassed.success);
        assert!(bypassed.details["overridden"].as_array().is_some_and(|v| !v.is_empty()));

        snap.protection.as_mut().unwrap().enforce_admins = true;
        assert!(!validate_branch_protection(&snap, &config).success);
    }

    #[test]
    fn test_unprotected_branch_passes() {
        let result = validate_branch_protection(&snapshot(vec![], vec![]), &AppConfig::default());
        assert!(result.success);
        assert_eq!(result.details["protected"], false);
    }
}
