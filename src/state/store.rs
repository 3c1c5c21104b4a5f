use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{AppError, Result};
use crate::state::{WorkflowState, WorkflowStatus};

/// File-backed store holding one JSON record per issue id.
///
/// Layout under the state directory:
///
/// - `<key>.json`: the workflow record, replaced atomically on save
/// - `<key>.lock`: advisory lock file held for the duration of one step.
///   Never removed, so every process locks the same inode.
///
/// `<key>` is the issue id with every byte outside `[A-Za-z0-9._-]` written
/// as `%XX`, so distinct ids never share a file.
#[derive(Debug, Clone)]
pub struct WorkflowStateStore {
    dir: PathBuf,
}

/// Exclusive hold on one issue's record. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    issue_id: String,
}

impl StateLock {
    pub fn issue_id(&self) -> &str {
        &self.issue_id
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(issue = %self.issue_id, error = %e, "Failed to release state lock");
        }
    }
}

fn state_key(issue_id: &str) -> Result<String> {
    let trimmed = issue_id.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Issue id must not be empty".to_string()));
    }
    let mut key = String::with_capacity(trimmed.len());
    for byte in trimmed.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            key.push(char::from(byte));
        } else {
            key.push_str(&format!("%{byte:02X}"));
        }
    }
    if key.chars().all(|c| c == '.') {
        return Err(AppError::Validation(format!("Invalid issue id: {issue_id}")));
    }
    Ok(key)
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl WorkflowStateStore {
    /// Open a store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AppError::Config(format!(
                "Failed to create state directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, issue_id: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.json", state_key(issue_id)?)))
    }

    fn lock_path_for(&self, issue_id: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.lock", state_key(issue_id)?)))
    }

    /// Take the advisory lock for an issue without waiting.
    ///
    /// Contention is an error: a second step for the same issue must not run.
    pub fn lock(&self, issue_id: &str) -> Result<StateLock> {
        let lock_path = self.lock_path_for(issue_id)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(StateLock {
                file,
                issue_id: issue_id.to_string(),
            }),
            Err(e) if is_contended(&e) => Err(AppError::StateLocked(issue_id.to_string())),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    pub fn exists(&self, issue_id: &str) -> Result<bool> {
        Ok(self.path_for(issue_id)?.exists())
    }

    /// Load a record. A record that cannot be parsed is left in place and
    /// reported as corrupted.
    pub fn load(&self, issue_id: &str) -> Result<WorkflowState> {
        let path = self.path_for(issue_id)?;
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::WorkflowNotFound(issue_id.to_string()));
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let state: WorkflowState =
            serde_json::from_slice(&raw).map_err(|e| AppError::StateCorrupted {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if state.issue_id != issue_id.trim() {
            return Err(AppError::StateCorrupted {
                path,
                reason: format!("record belongs to issue {}", state.issue_id),
            });
        }

        Ok(state)
    }

    /// Write a record: temporary file in the same directory, fsync, rename.
    pub fn save(&self, state: &WorkflowState) -> Result<()> {
        let path = self.path_for(&state.issue_id)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), state)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&path).map_err(|e| AppError::Io(e.error))?;

        tracing::debug!(issue = %state.issue_id, status = %state.status, "Saved workflow state");
        Ok(())
    }

    /// Create the record for a new issue. Exactly one record may exist per issue.
    pub fn create(&self, state: &WorkflowState) -> Result<()> {
        let _lock = self.lock(&state.issue_id)?;
        if self.exists(&state.issue_id)? {
            return Err(AppError::Validation(format!(
                "A workflow already exists for issue {}",
                state.issue_id
            )));
        }
        self.save(state)
    }

    /// Every readable record. Unreadable ones are skipped with a warning.
    pub fn list(&self) -> Result<Vec<WorkflowState>> {
        let mut states = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(AppError::Io)
                .and_then(|raw| serde_json::from_slice::<WorkflowState>(&raw).map_err(Into::into));
            match parsed {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable state record");
                }
            }
        }
        states.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(states)
    }

    pub fn find_by_pr(&self, pr_number: u64) -> Result<Option<WorkflowState>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|s| s.pr_number == pr_number)
            .max_by_key(|s| s.created_at))
    }

    /// Delete COMPLETED records last updated before `now - retention`.
    /// Returns the purged issue ids. Records locked by a running step are skipped.
    pub fn purge_completed(
        &self,
        retention: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let cutoff = now - retention;
        let mut purged = Vec::new();

        for state in self.list()? {
            if state.status != WorkflowStatus::Completed || state.updated_at >= cutoff {
                continue;
            }

            let lock = match self.lock(&state.issue_id) {
                Ok(lock) => lock,
                Err(AppError::StateLocked(_)) => continue,
                Err(e) => return Err(e),
            };
            std::fs::remove_file(self.path_for(&state.issue_id)?)?;
            drop(lock);

            tracing::info!(issue = %state.issue_id, "Purged completed workflow record");
            purged.push(state.issue_id);
        }

        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::state::{Review, ReviewKind, ReviewStatus};

    fn store() -> (tempfile::TempDir, WorkflowStateStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = WorkflowStateStore::open(tmp.path().join("state")).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_state_key_escapes() {
        assert_eq!(state_key("PROJ-12").unwrap(), "PROJ-12");
        assert_eq!(state_key("../../etc/passwd").unwrap(), "..%2F..%2Fetc%2Fpasswd");
        assert_eq!(state_key("#42").unwrap(), "%2342");
        assert_eq!(state_key("50%").unwrap(), "50%25");
        assert_eq!(state_key("é").unwrap(), "%C3%A9");
        assert!(state_key("  ").is_err());
        assert!(state_key("..").is_err());
    }

    #[test]
    fn test_distinct_ids_get_distinct_records() {
        let (_tmp, store) = store();
        let ids = ["a/b", "a_b", "a b", "a%2Fb", "a:b"];
        let paths: HashSet<PathBuf> = ids.iter().map(|id| store.path_for(id).unwrap()).collect();
        assert_eq!(paths.len(), ids.len());

        for (n, id) in ids.iter().enumerate() {
            store.save(&WorkflowState::new(*id, n as u64 + 1, "branch", None)).unwrap();
        }
        for (n, id) in ids.iter().enumerate() {
            assert_eq!(store.load(id).unwrap().pr_number, n as u64 + 1);
        }

        // Held locks on one id do not block a look-alike
        let _held = store.lock("a/b").unwrap();
        assert!(store.lock("a_b").is_ok());
    }

    #[test]
    fn test_save_and_load_preserves_history() {
        let (_tmp, store) = store();
        let mut state = WorkflowState::new("42", 7, "feature/x", None);
        state.append_review(
            Review::new(ReviewKind::Ai, ReviewStatus::CommentsPosted).with_comments(vec!["nit".into()]),
        );
        store.save(&state).unwrap();

        let loaded = store.load("42").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.load("nope").unwrap_err(),
            AppError::WorkflowNotFound(_)
        ));
    }

    #[test]
    fn test_corrupted_record_is_preserved() {
        let (_tmp, store) = store();
        let path = store.path_for("42").unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        let err = store.load("42").unwrap_err();
        assert!(matches!(err, AppError::StateCorrupted { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"{ not json");
    }

    #[test]
    fn test_lock_contention_fails_loudly() {
        let (_tmp, store) = store();
        let held = store.lock("42").unwrap();
        assert!(matches!(store.lock("42").unwrap_err(), AppError::StateLocked(_)));
        // Other issues are independent
        assert!(store.lock("43").is_ok());
        drop(held);
        assert!(store.lock("42").is_ok());
    }

    #[test]
    fn test_create_rejects_duplicate() {
        let (_tmp, store) = store();
        let state = WorkflowState::new("42", 7, "feature", None);
        store.create(&state).unwrap();
        assert!(matches!(
            store.create(&state).unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_tmp, store) = store();
        store.save(&WorkflowState::new("42", 7, "feature", None)).unwrap();
        store.save(&WorkflowState::new("42", 7, "feature", None)).unwrap();
        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["42.json".to_string()]);
    }

    #[test]
    fn test_find_by_pr_and_list_skip_corrupt() {
        let (_tmp, store) = store();
        store.save(&WorkflowState::new("1", 10, "a", None)).unwrap();
        store.save(&WorkflowState::new("2", 20, "b", None)).unwrap();
        std::fs::write(store.dir().join("3.json"), b"garbage").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.find_by_pr(20).unwrap().unwrap().issue_id, "2");
        assert!(store.find_by_pr(30).unwrap().is_none());
    }

    #[test]
    fn test_purge_completed_respects_retention() {
        let (_tmp, store) = store();
        let now = Utc::now();

        let mut old = WorkflowState::new("old", 1, "a", None);
        old.status = WorkflowStatus::Completed;
        old.updated_at = now - chrono::Duration::days(40);
        store.save(&old).unwrap();

        let mut recent = WorkflowState::new("recent", 2, "b", None);
        recent.status = WorkflowStatus::Completed;
        recent.updated_at = now - chrono::Duration::days(1);
        store.save(&recent).unwrap();

        let mut failed = WorkflowState::new("failed", 3, "c", None);
        failed.status = WorkflowStatus::Failed;
        failed.updated_at = now - chrono::Duration::days(90);
        store.save(&failed).unwrap();

        let purged = store.purge_completed(chrono::Duration::days(30), now).unwrap();
        assert_eq!(purged, vec!["old".to_string()]);
        assert!(!store.exists("old").unwrap());
        assert!(store.exists("recent").unwrap());
        assert!(store.exists("failed").unwrap());
    }

    #[test]
    fn test_purge_keeps_lock_file_shared() {
        let (_tmp, store) = store();
        let now = Utc::now();
        let mut old = WorkflowState::new("old", 1, "a", None);
        old.status = WorkflowStatus::Completed;
        old.updated_at = now - chrono::Duration::days(40);
        store.save(&old).unwrap();

        // Another process opened the lock file before the purge ran
        let lock_path = store.lock_path_for("old").unwrap();
        let early = OpenOptions::new().read(true).write(true).open(&lock_path).unwrap();

        assert_eq!(
            store.purge_completed(chrono::Duration::days(30), now).unwrap(),
            vec!["old".to_string()]
        );
        assert!(lock_path.exists());

        early.try_lock_exclusive().unwrap();
        assert!(matches!(store.lock("old").unwrap_err(), AppError::StateLocked(_)));
        FileExt::unlock(&early).unwrap();
        assert!(store.lock("old").is_ok());
    }
}
