use crate::agent::AgentContext;
use crate::review::Comment;

/// System prompt for a named agent.
pub fn system_prompt(agent: &str, context: &AgentContext) -> String {
    let location = context
        .working_dir
        .as_ref()
        .map(|dir| format!("\nThe working tree is checked out at `{}`.", dir.display()))
        .unwrap_or_default();

    let role = match agent {
        "pull-request-reviewer" => {
            "You are a meticulous code reviewer. You point out bugs, security problems, \
             performance issues and unclear code. You never praise without reason."
        }
        _ => {
            "You are an expert software engineer. You make minimal, focused changes that \
             follow the existing code style."
        }
    };

    format!("{role}{location}")
}

/// Ask for a review of a pull request diff.
pub fn review_prompt(pr_number: u64, title: &str, body: &str, diff: &str) -> String {
    format!(
        r#"Review pull request #{pr_number}: {title}

## Description
{body}

## Diff
```diff
{diff}
```

## Instructions
1. Summarize the change in a few sentences.
2. List concrete problems. Anchor each one to a file and a line on the new side of the diff.
3. End your reply with a single fenced json block in this shape:

```json
{{"comments": [{{"path": "src/file.rs", "line": 42, "body": "what is wrong and how to fix it"}}]}}
```

Use an empty list when you found nothing worth changing."#
    )
}

/// Ask for code changes addressing unresolved review threads.
pub fn update_prompt(pr_number: u64, comments: &[&Comment]) -> String {
    let listing = comments
        .iter()
        .map(|c| {
            let location = match (&c.file, c.line) {
                (Some(file), Some(line)) => format!(" ({file}:{line})"),
                (Some(file), None) => format!(" ({file})"),
                _ => String::new(),
            };
            format!(
                "- thread {} [{:?}, priority {}] @{}{}: {}",
                c.thread_id, c.category, c.priority, c.author, location, c.body
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Address the unresolved review feedback on pull request #{pr_number}.

## Unresolved threads (most urgent first)
{listing}

## Instructions
1. Fix every thread you agree with. Keep changes minimal.
2. If a thread asks for something outside the scope of this pull request, do not change code for it.
3. End your reply with a single fenced json block in this shape:

```json
{{"files": [{{"path": "src/file.rs", "content": "full new file content"}}],
 "addressed_threads": [123],
 "out_of_scope_threads": [456]}}
```"#
    )
}

/// Ask for guidance on resolving one conflicted file.
pub fn conflict_prompt(path: &str, conflict_type: &str, complexity: &str, excerpt: &str) -> String {
    format!(
        r#"The file `{path}` has a {conflict_type} merge conflict of {complexity} complexity.

## Conflict excerpt
```
{excerpt}
```

Explain, as a short numbered list of steps, how to resolve this conflict safely. Do not rewrite the file."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::CommentCategory;
    use crate::state::ResolutionStatus;

    #[test]
    fn test_update_prompt_lists_threads() {
        let comment = Comment {
            id: 1,
            thread_id: 99,
            author: "alice".to_string(),
            file: Some("src/lib.rs".to_string()),
            line: Some(3),
            body: "handle the error".to_string(),
            category: CommentCategory::Bug,
            priority: 70,
            resolution: ResolutionStatus::Unresolved,
            created_at: chrono::Utc::now(),
        };
        let prompt = update_prompt(5, &[&comment]);
        assert!(prompt.contains("thread 99"));
        assert!(prompt.contains("(src/lib.rs:3)"));
        assert!(prompt.contains("\"addressed_threads\""));
    }

    #[test]
    fn test_system_prompt_selects_role() {
        let ctx = AgentContext::default();
        assert!(system_prompt("pull-request-reviewer", &ctx).contains("code reviewer"));
        assert!(system_prompt("coder", &ctx).contains("software engineer"));
    }
}
