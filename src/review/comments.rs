use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::platform::types::ReviewComment;
use crate::state::ResolutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentCategory {
    Security,
    Bug,
    Performance,
    Style,
    Other,
}

impl CommentCategory {
    fn base_priority(self) -> i32 {
        match self {
            CommentCategory::Security => 80,
            CommentCategory::Bug => 70,
            CommentCategory::Performance => 50,
            CommentCategory::Other => 30,
            CommentCategory::Style => 20,
        }
    }
}

/// A review comment after categorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub thread_id: u64,
    pub author: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub body: String,
    pub category: CommentCategory,
    /// 0..=100, higher is more urgent.
    pub priority: u8,
    pub resolution: ResolutionStatus,
    pub created_at: DateTime<Utc>,
}

/// What happened to a comment's thread during an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
    /// A code change was pushed that references these threads.
    CodeChange { referenced_threads: Vec<u64> },
    /// The thread was flagged as out of scope for this change.
    OutOfScope,
    NoAction,
}

/// New-side line numbers present in a unified diff, per file.
#[derive(Debug, Clone, Default)]
pub struct DiffAnchors {
    lines: HashMap<String, HashSet<u32>>,
}

impl DiffAnchors {
    pub fn parse(diff: &str) -> Self {
        let mut lines: HashMap<String, HashSet<u32>> = HashMap::new();
        let mut current: Option<String> = None;
        let mut next_line: u32 = 0;
        let mut old_left: u32 = 0;
        let mut new_left: u32 = 0;
        let mut after_old_header = false;

        for raw in diff.lines() {
            // Inside a hunk every line is content until both sides are consumed.
            if old_left > 0 || new_left > 0 {
                match raw.as_bytes().first() {
                    Some(b'+') => {
                        if let Some(path) = &current {
                            lines.entry(path.clone()).or_default().insert(next_line);
                        }
                        next_line += 1;
                        new_left = new_left.saturating_sub(1);
                    }
                    Some(b'-') => old_left = old_left.saturating_sub(1),
                    Some(b'\\') => {}
                    _ => {
                        if let Some(path) = &current {
                            lines.entry(path.clone()).or_default().insert(next_line);
                        }
                        next_line += 1;
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                    }
                }
                continue;
            }

            let follows_old_header = std::mem::take(&mut after_old_header);
            if raw.starts_with("diff --git") {
                current = None;
            } else if raw.starts_with("--- ") {
                after_old_header = true;
            } else if let Some(path) = raw.strip_prefix("+++ ").filter(|_| follows_old_header) {
                current = path.strip_prefix("b/").map(|p| p.to_string());
                if let Some(path) = &current {
                    lines.entry(path.clone()).or_default();
                }
            } else if let Some(caps) = HUNK_HEADER.captures(raw) {
                let count = |i: usize| -> Option<u32> {
                    caps.get(i).map_or(Some(1), |m| m.as_str().parse().ok())
                };
                next_line = caps[2].parse().unwrap_or(0);
                old_left = count(1).unwrap_or(0);
                new_left = count(3).unwrap_or(0);
            }
        }

        Self { lines }
    }

    pub fn contains(&self, path: &str, line: u32) -> bool {
        self.lines.get(path).is_some_and(|l| l.contains(&line))
    }
}

static SECURITY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(security|vulnerable|vulnerability|exploit|injection|xss|csrf)\b",
        r"\b(sanitize|escape|permission|access control)\b",
        r"\b(password|secret|credential)s?\b",
    ])
});

static BUG: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(bug|error|broken|fails?|crash(es)?|exception|null pointer|undefined|breaks)\b",
        r"(doesn't work|not working|incorrect|wrong|off[- ]by[- ]one)",
    ])
});

static PERFORMANCE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(performance|slow|optimi[sz]e|inefficient|bottleneck|latency)\b",
        r"\b(n\+1|allocation|memory|cpu|quadratic)\b",
    ])
});

static STYLE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(style|format|formatting|naming|convention|inconsistent)\b",
        r"\b(indent|indentation|spacing|whitespace|typo|grammar|camelCase|snake_case)\b",
    ])
});

static RAISE: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"\b(critical|urgent|blocking|blocker|broken|security)\b"]));

static IMPORTANT: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"\b(important|should|must|required)\b"]));

static LOWER: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"\b(nit|nitpick|minor|optional)\b"]));

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -\d+(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Categorizes, prioritizes and tracks resolution of review comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentProcessor;

impl CommentProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Category by content. Security and bug outrank performance, which
    /// outranks style.
    pub fn categorize(&self, body: &str) -> CommentCategory {
        if any_match(&SECURITY, body) {
            CommentCategory::Security
        } else if any_match(&BUG, body) {
            CommentCategory::Bug
        } else if any_match(&PERFORMANCE, body) {
            CommentCategory::Performance
        } else if any_match(&STYLE, body) {
            CommentCategory::Style
        } else {
            CommentCategory::Other
        }
    }

    pub fn priority(&self, category: CommentCategory, body: &str) -> u8 {
        let mut score = category.base_priority();
        if any_match(&RAISE, body) {
            score += 20;
        } else if any_match(&IMPORTANT, body) {
            score += 10;
        }
        if any_match(&LOWER, body) {
            score -= 15;
        }
        score.clamp(0, 100) as u8
    }

    /// Categorize and score host comments, carrying over known resolutions.
    /// Sorted by priority descending, then thread creation order.
    pub fn analyze(
        &self,
        raw: &[ReviewComment],
        resolutions: &BTreeMap<u64, ResolutionStatus>,
    ) -> Vec<Comment> {
        let thread_started: HashMap<u64, DateTime<Utc>> =
            raw.iter().fold(HashMap::new(), |mut acc, c| {
                let entry = acc.entry(c.thread_id).or_insert(c.created_at);
                if c.created_at < *entry {
                    *entry = c.created_at;
                }
                acc
            });

        let mut comments: Vec<Comment> = raw
            .iter()
            .map(|c| {
                let category = self.categorize(&c.body);
                Comment {
                    id: c.id,
                    thread_id: c.thread_id,
                    author: c.author.clone(),
                    file: c.path.clone(),
                    line: c.line,
                    body: c.body.clone(),
                    category,
                    priority: self.priority(category, &c.body),
                    resolution: resolutions.get(&c.thread_id).copied().unwrap_or_default(),
                    created_at: c.created_at,
                }
            })
            .collect();

        // Stable sort keeps host order for full ties
        comments.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| thread_started[&a.thread_id].cmp(&thread_started[&b.thread_id]))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        comments
    }

    /// Comments still needing work. Drops resolved or dismissed threads and,
    /// when a diff is given, comments anchored to lines no longer in it.
    pub fn get_unresolved<'a>(
        &self,
        comments: &'a [Comment],
        anchors: Option<&DiffAnchors>,
    ) -> Vec<&'a Comment> {
        comments
            .iter()
            .filter(|c| c.resolution == ResolutionStatus::Unresolved)
            .filter(|c| match (anchors, &c.file, c.line) {
                (Some(anchors), Some(file), Some(line)) => anchors.contains(file, line),
                _ => true,
            })
            .collect()
    }

    /// Apply an update outcome to a comment. Returns the new status.
    pub fn track_resolution(&self, comment: &mut Comment, action: &ResolutionAction) -> ResolutionStatus {
        match action {
            ResolutionAction::CodeChange { referenced_threads }
                if referenced_threads.contains(&comment.thread_id) =>
            {
                comment.resolution = ResolutionStatus::Resolved;
            }
            ResolutionAction::OutOfScope => {
                comment.resolution = ResolutionStatus::Dismissed;
            }
            _ => {}
        }
        comment.resolution
    }

    /// Unresolved comments at or above the blocking threshold.
    pub fn blocking<'a>(&self, comments: &[&'a Comment], threshold: u8) -> Vec<&'a Comment> {
        comments
            .iter()
            .copied()
            .filter(|c| c.priority >= threshold)
            .collect()
    }
}
