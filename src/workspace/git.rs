use std::path::{Path, PathBuf};

use git2::{
    BranchType, Cred, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature,
    WorktreeAddOptions, WorktreePruneOptions,
};

use crate::error::{AppError, Result};
use crate::workspace::TrialMerge;

/// Validate a branch name to prevent argument injection.
pub(crate) fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('-') || name.contains("..") {
        return Err(AppError::Git(format!("Invalid branch name: {name}")));
    }
    Ok(())
}

/// Build `PushOptions` that authenticate via credential callback.
/// Without a token the user's credential helper is consulted.
fn make_push_options(token: Option<&str>) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, _allowed_types| match token {
        Some(token) => Cred::userpass_plaintext("x-access-token", token),
        None => {
            let config = git2::Config::open_default()?;
            Cred::credential_helper(&config, url, username_from_url)
        }
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

fn worktree_name(branch: &str) -> String {
    branch
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Attach a worktree for `branch` at `path`, creating the branch from HEAD
/// when it does not exist locally.
pub async fn add_worktree(repo_path: &Path, path: &Path, branch: &str) -> Result<()> {
    validate_branch_name(branch)?;

    let repo_path = repo_path.to_path_buf();
    let path = path.to_path_buf();
    let branch = branch.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_path)?;
        let local = match repo.find_branch(&branch, BranchType::Local) {
            Ok(b) => b,
            Err(_) => {
                let start = match repo.find_branch(&format!("origin/{branch}"), BranchType::Remote) {
                    Ok(remote) => remote.get().peel_to_commit()?,
                    Err(_) => repo.head()?.peel_to_commit()?,
                };
                repo.branch(&branch, &start, false)?
            }
        };

        let reference = local.into_reference();
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        repo.worktree(&worktree_name(&branch), &path, Some(&opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Worktree-add task panicked: {e}")))?
}

/// Delete a worktree directory and prune its administrative files.
pub async fn remove_worktree(repo_path: &Path, path: &Path) -> Result<()> {
    let repo_path = repo_path.to_path_buf();
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_path)?;
        let target = path.canonicalize().unwrap_or_else(|_| path.clone());

        let mut found = false;
        for name in repo.worktrees()?.iter().flatten() {
            let worktree = repo.find_worktree(name)?;
            let wt_path: PathBuf = worktree
                .path()
                .canonicalize()
                .unwrap_or_else(|_| worktree.path().to_path_buf());
            if wt_path == target {
                if path.exists() {
                    std::fs::remove_dir_all(&path)?;
                }
                let mut opts = WorktreePruneOptions::new();
                opts.valid(true).working_tree(true);
                worktree.prune(Some(&mut opts))?;
                found = true;
                break;
            }
        }

        if !found {
            return Err(AppError::Workspace(format!(
                "No worktree registered at {}",
                path.display()
            )));
        }
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Worktree-remove task panicked: {e}")))?
}

/// Delete a local branch.
pub async fn delete_branch(repo_path: &Path, branch: &str) -> Result<()> {
    validate_branch_name(branch)?;

    let repo_path = repo_path.to_path_buf();
    let branch = branch.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_path)?;
        repo.find_branch(&branch, BranchType::Local)?.delete()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Delete-branch task panicked: {e}")))?
}

/// Stage all changes.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-all task panicked: {e}")))?
}

/// Commit the index on top of HEAD.
pub async fn commit(dir: &Path, message: &str) -> Result<()> {
    let dir = dir.to_path_buf();
    let message = message.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Hypha Bot", "hypha[bot]@users.noreply.github.com"))?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let parent = repo.head()?.peel_to_commit()?;
        repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Push a branch to origin.
pub async fn push(dir: &Path, branch_name: &str, token: Option<&str>) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.map(|t| t.to_string());

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(token.as_deref());
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

/// Check if there are any staged or unstaged changes.
pub async fn has_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    })
    .await
    .map_err(|e| AppError::Git(format!("Has-changes task panicked: {e}")))?
}

fn resolve_base<'a>(repo: &'a Repository, base: &str) -> Result<git2::Commit<'a>> {
    for candidate in [format!("refs/remotes/origin/{base}"), format!("refs/heads/{base}")] {
        if let Ok(reference) = repo.find_reference(&candidate) {
            return Ok(reference.peel_to_commit()?);
        }
    }
    Err(AppError::Git(format!("Base branch not found: {base}")))
}

/// Merge HEAD with `base` in memory and report conflicting paths as
/// porcelain status lines (`UU`, `AA`, `UD`, `DU`, `DD`). Content conflicts
/// also carry the file rendered with conflict markers.
pub(crate) fn trial_merge_blocking(dir: &Path, base: &str) -> Result<TrialMerge> {
    let repo = Repository::open(dir)?;
    let ours = repo.head()?.peel_to_commit()?;
    let theirs = resolve_base(&repo, base)?;

    let index = repo.merge_commits(&ours, &theirs, None)?;
    let mut trial = TrialMerge::default();
    if !index.has_conflicts() {
        return Ok(trial);
    }

    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());
        let Some(entry) = entry else { continue };
        let path = String::from_utf8_lossy(&entry.path).into_owned();

        let code = match (&conflict.ancestor, &conflict.our, &conflict.their) {
            (Some(_), Some(_), Some(_)) => "UU",
            (None, Some(_), Some(_)) => "AA",
            (Some(_), Some(_), None) => "UD",
            (Some(_), None, Some(_)) => "DU",
            _ => "DD",
        };
        trial.lines.push(format!("{code} {path}"));

        if let (Some(ancestor), Some(our), Some(their)) =
            (&conflict.ancestor, &conflict.our, &conflict.their)
        {
            match repo.merge_file_from_index(ancestor, our, their, None) {
                Ok(merged) => {
                    trial
                        .contents
                        .insert(path, String::from_utf8_lossy(merged.content()).into_owned());
                }
                Err(e) => {
                    tracing::debug!(path = %path, error = %e, "Could not render conflict markers");
                }
            }
        }
    }

    Ok(trial)
}

pub async fn trial_merge(dir: &Path, base: &str) -> Result<TrialMerge> {
    validate_branch_name(base)?;
    let dir = dir.to_path_buf();
    let base = base.to_string();

    tokio::task::spawn_blocking(move || trial_merge_blocking(&dir, &base))
        .await
        .map_err(|e| AppError::Git(format!("Trial-merge task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap().to_path_buf();
        fs::write(workdir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    fn checkout(repo: &Repository, branch: &str) {
        let obj = repo.revparse_single(&format!("refs/heads/{branch}")).unwrap();
        repo.checkout_tree(&obj, Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        repo.set_head(&format!("refs/heads/{branch}")).unwrap();
    }

    #[test]
    fn test_validate_branch_name() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("feature/issue-42").is_ok());
    }

    #[test]
    fn test_worktree_name_is_flat() {
        assert_eq!(worktree_name("feature/issue_42"), "feature-issue-42");
    }

    #[test]
    fn test_has_changes_with_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let _repo = Repository::init(tmp.path()).unwrap();
        fs::write(tmp.path().join("hello.txt"), "world").unwrap();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert!(rt.block_on(has_changes(tmp.path())).unwrap());
    }

    #[test]
    fn test_trial_merge_reports_content_conflict_with_markers() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        commit_file(&repo, "app.py", "a = 1\n", "base");
        let base_commit = repo.head().unwrap().peel_to_commit().unwrap();
        let head_name = repo.head().unwrap().shorthand().unwrap().to_string();
        repo.branch("feature", &base_commit, false).unwrap();

        commit_file(&repo, "app.py", "a = 2\n", "main change");

        checkout(&repo, "feature");
        commit_file(&repo, "app.py", "a = 3\n", "feature change");

        let trial = trial_merge_blocking(tmp.path(), &head_name).unwrap();
        assert_eq!(trial.lines, vec!["UU app.py".to_string()]);
        let content = trial.contents.get("app.py").unwrap();
        assert!(content.contains("<<<<<<<"));
        assert!(content.contains(">>>>>>>"));
    }

    #[test]
    fn test_trial_merge_clean_merge_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        commit_file(&repo, "a.txt", "one\n", "base");
        let base_commit = repo.head().unwrap().peel_to_commit().unwrap();
        let head_name = repo.head().unwrap().shorthand().unwrap().to_string();
        repo.branch("feature", &base_commit, false).unwrap();
        commit_file(&repo, "b.txt", "two\n", "main change");

        checkout(&repo, "feature");
        commit_file(&repo, "c.txt", "three\n", "feature change");

        let trial = trial_merge_blocking(tmp.path(), &head_name).unwrap();
        assert!(trial.lines.is_empty());
    }
}
