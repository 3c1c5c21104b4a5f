//! Classification of merge conflicts and resolution guidance.
//!
//! Conflict output comes from two places: the code host's refusal message
//! and the local [`TrialMerge`](crate::workspace::TrialMerge). Both are
//! parsed with the same vocabulary:
//!
//! - porcelain status codes (`UU`, `AA`, `DD`, `UD`, `DU`, `AU`, `UA`)
//! - `git status` long form (`both modified:`, `deleted by them:`, ...)
//! - `git merge` messages (`CONFLICT (content): Merge conflict in ...`)

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::{prompt, AgentContext, AiAgent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Content,
    AddAdd,
    ModifyDelete,
    Delete,
    Rename,
    Mode,
}

impl ConflictType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictType::Content => "content",
            ConflictType::AddAdd => "add-add",
            ConflictType::ModifyDelete => "modify-delete",
            ConflictType::Delete => "delete",
            ConflictType::Rename => "rename",
            ConflictType::Mode => "mode",
        }
    }
}

/// Ordered from least to most effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::Critical => "critical",
        }
    }

    /// Estimated minutes to resolve one conflict of this complexity.
    pub fn estimated_minutes(self) -> u32 {
        match self {
            Complexity::Simple => 5,
            Complexity::Moderate => 15,
            Complexity::Complex => 30,
            Complexity::Critical => 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub path: String,
    pub conflict_type: ConflictType,
    pub complexity: Complexity,
    /// Start of the first conflict section, at most 200 characters.
    pub excerpt: String,
    pub affected_lines: usize,
    pub sections: usize,
    /// Git's own wording when the path alone does not describe the conflict,
    /// e.g. both sides of a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    Ai,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSuggestion {
    pub path: String,
    pub steps: Vec<String>,
    pub source: SuggestionSource,
}

/// Prioritized conflicts with guidance, for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<ConflictDetail>,
    pub suggestions: Vec<ResolutionSuggestion>,
    pub estimated_minutes: u32,
}

impl ConflictReport {
    pub fn files(&self) -> Vec<String> {
        self.conflicts.iter().map(|c| c.path.clone()).collect()
    }
}

const EXCERPT_LIMIT: usize = 200;

static PORCELAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(UU|AA|DD|AU|UA|DU|UD)\s+(.+)$").unwrap());
static LONG_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(both modified|both added|both deleted|deleted by us|deleted by them|added by us|added by them):\s+(.+)$").unwrap()
});
static MERGE_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CONFLICT \(([^)]+)\):\s*(.+)$").unwrap());

/// One conflicting path as reported by git.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    path: String,
    conflict_type: ConflictType,
    note: Option<String>,
}

impl Entry {
    fn new(path: &str, conflict_type: ConflictType) -> Self {
        Self {
            path: path.trim().to_string(),
            conflict_type,
            note: None,
        }
    }
}

/// Path a rename ends up at, from either `Rename a->b in HEAD` or
/// `a deleted in HEAD and renamed to b in feature.`
fn rename_destination(message: &str) -> Option<&str> {
    let rest = match message.split_once("->") {
        Some((_, rest)) => rest,
        None => message.split_once("renamed to ")?.1,
    };
    rest.split_whitespace()
        .next()
        .map(|p| p.trim_end_matches(['.', ',', ';']))
        .filter(|p| !p.is_empty())
}

fn classify_merge_message(kind: &str, message: &str) -> Option<Entry> {
    let conflict_type = match kind {
        "content" => ConflictType::Content,
        "add/add" => ConflictType::AddAdd,
        "modify/delete" | "delete/modify" => ConflictType::ModifyDelete,
        k if k.contains("rename") => ConflictType::Rename,
        k if k.contains("mode") => ConflictType::Mode,
        _ => ConflictType::Content,
    };

    if conflict_type == ConflictType::Rename {
        let path = rename_destination(message).or_else(|| message.split_whitespace().next())?;
        return Some(Entry {
            note: Some(message.trim().to_string()),
            ..Entry::new(path, conflict_type)
        });
    }

    let path = match message.split_once("Merge conflict in ") {
        Some((_, path)) => path.trim(),
        None => message.split_whitespace().next()?,
    };
    Some(Entry::new(path, conflict_type))
}

fn parse_line(line: &str) -> Option<Entry> {
    let line = line.trim_end();

    if let Some(caps) = PORCELAIN.captures(line) {
        let conflict_type = match &caps[1] {
            "UU" => ConflictType::Content,
            "AA" | "AU" | "UA" => ConflictType::AddAdd,
            "DD" => ConflictType::Delete,
            _ => ConflictType::ModifyDelete,
        };
        return Some(Entry::new(&caps[2], conflict_type));
    }

    let trimmed = line.trim_start();
    if let Some(caps) = LONG_STATUS.captures(trimmed) {
        let conflict_type = match &caps[1] {
            "both modified" => ConflictType::Content,
            "both added" | "added by us" | "added by them" => ConflictType::AddAdd,
            "both deleted" => ConflictType::Delete,
            _ => ConflictType::ModifyDelete,
        };
        return Some(Entry::new(&caps[2], conflict_type));
    }

    if let Some(caps) = MERGE_MESSAGE.captures(trimmed) {
        return classify_merge_message(&caps[1], &caps[2]);
    }

    None
}

fn entries(raw_output: &str) -> Vec<Entry> {
    let mut seen = HashSet::new();
    raw_output
        .lines()
        .filter_map(parse_line)
        .filter(|e| seen.insert(e.path.clone()))
        .collect()
}

/// Marker statistics of a file: (sections, conflicting lines, excerpt).
fn marker_stats(content: &str) -> (usize, usize, String) {
    let mut sections = 0;
    let mut lines = 0;
    let mut inside = false;
    let mut first_start: Option<usize> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        if line.starts_with("<<<<<<<") {
            sections += 1;
            inside = true;
            first_start.get_or_insert(offset);
        } else if line.starts_with(">>>>>>>") {
            inside = false;
        } else if inside && !line.starts_with("=======") && !line.starts_with("|||||||") {
            lines += 1;
        }
        offset += line.len();
    }

    let excerpt = first_start
        .map(|start| content[start..].chars().take(EXCERPT_LIMIT).collect())
        .unwrap_or_default();
    (sections, lines, excerpt)
}

fn complexity_for(sections: usize, lines: usize) -> Complexity {
    if sections == 1 && lines < 10 {
        Complexity::Simple
    } else if sections <= 3 && lines < 50 {
        Complexity::Moderate
    } else if lines < 100 {
        Complexity::Complex
    } else {
        Complexity::Critical
    }
}

/// Deterministic guidance by conflict type and complexity.
pub fn fallback_steps(conflict: &ConflictDetail) -> Vec<String> {
    let path = &conflict.path;
    let mut steps = match conflict.conflict_type {
        ConflictType::Content => vec![
            format!("Open {path} and locate the conflict markers (<<<<<<<, =======, >>>>>>>)"),
            format!(
                "Resolve each of the {} conflicting section(s), keeping the intended change from both sides",
                conflict.sections.max(1)
            ),
            "Remove all conflict markers".to_string(),
        ],
        ConflictType::AddAdd => vec![
            format!("Both branches added {path}; compare the two versions"),
            "Combine them into a single file that keeps both intents".to_string(),
        ],
        ConflictType::ModifyDelete => vec![
            format!("One side deleted {path} while the other modified it"),
            format!("Decide whether {path} should survive; keep it with `git add` or drop it with `git rm`"),
        ],
        ConflictType::Delete => vec![format!("Both sides removed {path}; confirm with `git rm {path}`")],
        ConflictType::Rename => {
            let mut steps = vec![
                format!("Pick the final name for {path}"),
                "Update every reference to the old name".to_string(),
            ];
            if let Some(note) = &conflict.note {
                steps.insert(0, format!("Git reported: {note}"));
            }
            steps
        }
        ConflictType::Mode => vec![format!("Choose the correct file mode for {path} and stage it")],
    };

    if conflict.complexity >= Complexity::Complex {
        steps.push("Review the result with the author of the conflicting base-branch change".to_string());
    }
    steps.push("Build and run the test suite before pushing the resolution".to_string());
    steps
}

/// Turn agent prose into steps, dropping list markers and blank lines.
fn steps_from_reply(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
                .to_string()
        })
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect()
}

/// Parses, classifies and explains merge conflicts. Never gates progress:
/// guidance falls back to deterministic steps whenever the agent fails.
pub struct ConflictAnalyzer {
    agent: Option<Arc<dyn AiAgent>>,
    agent_name: String,
    timeout: Duration,
}

impl ConflictAnalyzer {
    pub fn new(agent: Option<Arc<dyn AiAgent>>, agent_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent,
            agent_name: agent_name.into(),
            timeout,
        }
    }

    /// Conflicting paths and their types, deduplicated by path in first-seen order.
    pub fn parse(&self, raw_output: &str) -> Vec<(String, ConflictType)> {
        entries(raw_output)
            .into_iter()
            .map(|e| (e.path, e.conflict_type))
            .collect()
    }

    /// Complexity of one file. Without marker content the type decides:
    /// whole-file decisions are simple, merges of two versions moderate.
    pub fn complexity(&self, conflict_type: ConflictType, content: Option<&str>) -> (Complexity, usize, usize, String) {
        match content.map(marker_stats) {
            Some((sections, lines, excerpt)) if sections > 0 => {
                (complexity_for(sections, lines), sections, lines, excerpt)
            }
            _ => {
                let complexity = match conflict_type {
                    ConflictType::ModifyDelete | ConflictType::Delete | ConflictType::Mode => Complexity::Simple,
                    _ => Complexity::Moderate,
                };
                (complexity, 0, 0, String::new())
            }
        }
    }

    /// Parse and classify, using rendered file contents where available.
    pub fn analyze(&self, raw_output: &str, contents: &HashMap<String, String>) -> Vec<ConflictDetail> {
        let details = entries(raw_output)
            .into_iter()
            .map(|Entry { path, conflict_type, note }| {
                let (complexity, sections, affected_lines, excerpt) =
                    self.complexity(conflict_type, contents.get(&path).map(String::as_str));
                ConflictDetail {
                    path,
                    conflict_type,
                    complexity,
                    excerpt,
                    affected_lines,
                    sections,
                    note,
                }
            })
            .collect();
        self.prioritize(details)
    }

    /// Most complex first, then by path.
    pub fn prioritize(&self, mut conflicts: Vec<ConflictDetail>) -> Vec<ConflictDetail> {
        conflicts.sort_by(|a, b| b.complexity.cmp(&a.complexity).then_with(|| a.path.cmp(&b.path)));
        conflicts
    }

    pub fn estimated_minutes(&self, conflicts: &[ConflictDetail]) -> u32 {
        conflicts.iter().map(|c| c.complexity.estimated_minutes()).sum()
    }

    /// Guidance for one conflict. Agent failures and timeouts fall back to
    /// deterministic steps.
    pub async fn suggest(&self, conflict: &ConflictDetail, context: &AgentContext) -> ResolutionSuggestion {
        if let Some(agent) = &self.agent {
            let prompt_text = prompt::conflict_prompt(
                &conflict.path,
                conflict.conflict_type.as_str(),
                conflict.complexity.as_str(),
                if conflict.excerpt.is_empty() {
                    conflict.note.as_deref().unwrap_or_default()
                } else {
                    conflict.excerpt.as_str()
                },
            );
            let outcome =
                tokio::time::timeout(self.timeout, agent.invoke(&self.agent_name, &prompt_text, context)).await;

            match outcome {
                Ok(Ok(response)) if response.success => {
                    let steps = steps_from_reply(&response.text);
                    if !steps.is_empty() {
                        return ResolutionSuggestion {
                            path: conflict.path.clone(),
                            steps,
                            source: SuggestionSource::Ai,
                        };
                    }
                }
                Ok(Ok(response)) => {
                    tracing::warn!(path = %conflict.path, error = ?response.error, "Conflict guidance failed, using fallback");
                }
                Ok(Err(e)) => {
                    tracing::warn!(path = %conflict.path, error = %e, "Conflict guidance failed, using fallback");
                }
                Err(_) => {
                    tracing::warn!(path = %conflict.path, "Conflict guidance timed out, using fallback");
                }
            }
        }

        ResolutionSuggestion {
            path: conflict.path.clone(),
            steps: fallback_steps(conflict),
            source: SuggestionSource::Fallback,
        }
    }

    /// Full operator report for a set of conflicts.
    pub async fn report(&self, conflicts: Vec<ConflictDetail>, context: &AgentContext) -> ConflictReport {
        let conflicts = self.prioritize(conflicts);
        let mut suggestions = Vec::with_capacity(conflicts.len());
        for conflict in &conflicts {
            suggestions.push(self.suggest(conflict, context).await);
        }
        ConflictReport {
            estimated_minutes: self.estimated_minutes(&conflicts),
            conflicts,
            suggestions,
        }
    }
}
