//! Git-backed checkpoints: the only code that moves HEAD.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::CONTROL_DIR;
use crate::domain::{C2rsError, Checkpoint, Result};
use crate::metrics::METRICS;

/// Commit, reset and inspect the crate's version-control state.
///
/// Implementations are local and fast; failures are reported, never retried.
pub trait CheckpointStore: Send + Sync {
    /// Current HEAD, or `None` when no commit exists or git is unusable.
    fn current_checkpoint(&self) -> Option<Checkpoint>;

    /// Hard-reset the working tree and index. Returns `false` on any failure.
    fn reset_to(&self, checkpoint: &Checkpoint) -> bool;

    /// Remember the current HEAD as the last known-good snapshot.
    fn snapshot(&self) -> Option<Checkpoint>;

    /// Unconditional rollback to the last snapshot.
    ///
    /// Succeeds or fails the run: a reset that does not take is
    /// [`C2rsError::RollbackFailed`].
    fn reset_to_last_snapshot(&self) -> Result<()>;

    /// Stage everything and commit. Returns the resulting HEAD, which is the
    /// unchanged current checkpoint when there was nothing to commit.
    fn commit(&self, message: &str) -> Result<Option<Checkpoint>>;

    /// Unified diff of tracked files in the working tree against `checkpoint`.
    fn diff_since(&self, checkpoint: &Checkpoint) -> Result<String>;
}

/// [`CheckpointStore`] over the `git` binary.
pub struct GitCheckpointStore {
    repo_dir: PathBuf,
    /// Paths that survive `git clean` and are never staged.
    preserved: Vec<String>,
    last_snapshot: Mutex<Option<Checkpoint>>,
}

impl GitCheckpointStore {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            preserved: vec![CONTROL_DIR.to_string()],
            last_snapshot: Mutex::new(None),
        }
    }

    /// Keep `path` (relative to the repository) across resets.
    pub fn preserve(mut self, path: impl Into<String>) -> Self {
        self.preserved.push(path.into());
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn last_snapshot(&self) -> Option<Checkpoint> {
        self.last_snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent commits on HEAD, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        let limit = limit.to_string();
        let output = self.git(&["log", "--format=%H %cI", "-n", &limit])?;
        if !output.status.success() {
            // An unborn branch has no history.
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let (id, when) = line.split_once(' ')?;
                let created_at = DateTime::parse_from_rfc3339(when.trim())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Some(Checkpoint {
                    id: id.to_string(),
                    created_at,
                })
            })
            .collect())
    }

    fn git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|e| C2rsError::Git(format!("failed to run git: {e}")))
    }

    fn git_ok(&self, args: &[&str]) -> Result<Output> {
        let output = self.git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(C2rsError::Git(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(output)
    }

    fn has_identity(&self) -> bool {
        self.git(&["config", "user.email"])
            .map(|o| o.status.success() && !String::from_utf8_lossy(&o.stdout).trim().is_empty())
            .unwrap_or(false)
    }
}

impl CheckpointStore for GitCheckpointStore {
    fn current_checkpoint(&self) -> Option<Checkpoint> {
        let output = self.git(&["rev-parse", "--verify", "HEAD"]).ok()?;
        if !output.status.success() {
            return None;
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!sha.is_empty()).then(|| Checkpoint::new(sha))
    }

    fn reset_to(&self, checkpoint: &Checkpoint) -> bool {
        let reset = match self.git(&["reset", "--hard", &checkpoint.id]) {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                warn!(
                    checkpoint = %checkpoint.short(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "git reset --hard failed"
                );
                false
            }
            Err(e) => {
                warn!(checkpoint = %checkpoint.short(), error = %e, "git reset --hard failed");
                false
            }
        };
        if !reset {
            return false;
        }

        let mut args = vec!["clean", "-fd"];
        for path in &self.preserved {
            args.push("-e");
            args.push(path.as_str());
        }
        match self.git(&args) {
            Ok(output) if output.status.success() => {
                METRICS.inc_rollbacks();
                debug!(checkpoint = %checkpoint.short(), "working tree reset");
                true
            }
            _ => {
                warn!(checkpoint = %checkpoint.short(), "git clean failed after reset");
                false
            }
        }
    }

    fn snapshot(&self) -> Option<Checkpoint> {
        let current = self.current_checkpoint();
        *self
            .last_snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = current.clone();
        current
    }

    fn reset_to_last_snapshot(&self) -> Result<()> {
        let Some(snapshot) = self.last_snapshot() else {
            warn!("no snapshot recorded; nothing to roll back to");
            return Ok(());
        };
        if self.reset_to(&snapshot) {
            Ok(())
        } else {
            Err(C2rsError::RollbackFailed {
                checkpoint: snapshot.id,
            })
        }
    }

    fn commit(&self, message: &str) -> Result<Option<Checkpoint>> {
        let excludes: Vec<String> = self
            .preserved
            .iter()
            .map(|p| format!(":(exclude){p}"))
            .collect();
        let mut add = vec!["add", "-A", "--", "."];
        add.extend(excludes.iter().map(String::as_str));
        self.git_ok(&add)?;

        let staged = self.git(&["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            debug!("nothing to commit");
            return Ok(self.current_checkpoint());
        }

        let mut commit: Vec<&str> = Vec::new();
        if !self.has_identity() {
            commit.extend(["-c", "user.name=c2rs", "-c", "user.email=c2rs@localhost"]);
        }
        commit.extend(["commit", "-q", "-m", message]);
        self.git_ok(&commit)?;
        Ok(self.current_checkpoint())
    }

    fn diff_since(&self, checkpoint: &Checkpoint) -> Result<String> {
        let output = self.git_ok(&["diff", "--no-color", &checkpoint.id, "--"])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(dir.path().join("lib.rs"), "pub fn one() -> u32 { 1 }\n").unwrap();
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-m", "initial"]);
        dir
    }

    #[test]
    fn current_checkpoint_is_40_hex_chars() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        let cp = store.current_checkpoint().unwrap();
        assert_eq!(cp.id.len(), 40);
        assert!(cp.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn current_checkpoint_none_for_empty_repo() {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        let store = GitCheckpointStore::new(dir.path());
        assert!(store.current_checkpoint().is_none());
    }

    #[test]
    fn current_checkpoint_none_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitCheckpointStore::new(dir.path().join("missing"));
        assert!(store.current_checkpoint().is_none());
    }

    #[test]
    fn reset_to_invalid_checkpoint_returns_false() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        assert!(!store.reset_to(&Checkpoint::new("deadbeefdeadbeef")));
    }

    #[test]
    fn reset_discards_edits_and_untracked_files_but_keeps_control_dir() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        let before = store.current_checkpoint().unwrap();

        std::fs::write(repo.path().join("lib.rs"), "broken").unwrap();
        std::fs::write(repo.path().join("new.rs"), "fn x() {}").unwrap();
        std::fs::create_dir_all(repo.path().join(CONTROL_DIR)).unwrap();
        std::fs::write(repo.path().join(CONTROL_DIR).join("progress.json"), "{}").unwrap();

        assert!(store.reset_to(&before));
        assert_eq!(
            std::fs::read_to_string(repo.path().join("lib.rs")).unwrap(),
            "pub fn one() -> u32 { 1 }\n"
        );
        assert!(!repo.path().join("new.rs").exists());
        assert!(repo.path().join(CONTROL_DIR).join("progress.json").exists());
    }

    #[test]
    fn commit_creates_new_checkpoint_and_skips_control_dir() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        let before = store.current_checkpoint().unwrap();

        std::fs::write(repo.path().join("lib.rs"), "pub fn one() -> u32 { 2 }\n").unwrap();
        std::fs::create_dir_all(repo.path().join(CONTROL_DIR)).unwrap();
        std::fs::write(repo.path().join(CONTROL_DIR).join("config.json"), "{}").unwrap();

        let after = store.commit("fix").unwrap().unwrap();
        assert_ne!(before.id, after.id);

        let tracked = StdCommand::new("git")
            .args(["ls-files"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        let tracked = String::from_utf8_lossy(&tracked.stdout);
        assert!(!tracked.contains(CONTROL_DIR));
    }

    #[test]
    fn commit_without_changes_returns_current() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        let before = store.current_checkpoint().unwrap();
        let after = store.commit("noop").unwrap().unwrap();
        assert_eq!(before.id, after.id);
    }

    #[test]
    fn snapshot_round_trip() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        let snap = store.snapshot().unwrap();

        std::fs::write(repo.path().join("lib.rs"), "pub fn one() -> u32 { 3 }\n").unwrap();
        store.commit("later").unwrap();
        assert_ne!(store.current_checkpoint().unwrap().id, snap.id);

        store.reset_to_last_snapshot().unwrap();
        assert_eq!(store.current_checkpoint().unwrap().id, snap.id);
    }

    #[test]
    fn reset_to_last_snapshot_without_snapshot_is_noop() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        std::fs::write(repo.path().join("lib.rs"), "edited").unwrap();
        store.reset_to_last_snapshot().unwrap();
        assert_eq!(
            std::fs::read_to_string(repo.path().join("lib.rs")).unwrap(),
            "edited"
        );
    }

    #[test]
    fn diff_since_reports_removed_lines() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        let cp = store.current_checkpoint().unwrap();
        std::fs::write(repo.path().join("lib.rs"), "").unwrap();
        let diff = store.diff_since(&cp).unwrap();
        assert!(diff.contains("-pub fn one() -> u32 { 1 }"));
    }

    #[test]
    fn history_lists_newest_first() {
        let repo = make_git_repo();
        let store = GitCheckpointStore::new(repo.path());
        std::fs::write(repo.path().join("lib.rs"), "pub fn two() {}\n").unwrap();
        let second = store.commit("second").unwrap().unwrap();
        let history = store.history(5).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
    }
}
