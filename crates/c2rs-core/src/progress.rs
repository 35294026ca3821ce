//! Resume and audit records in `progress.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{read_json, write_json_atomic};
use crate::domain::{Checkpoint, Result};
use crate::workspace::relative_path;

/// One verified fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub commit: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// On-disk shape of `progress.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressFile {
    /// Crate-relative files touched by completed work.
    pub processed: BTreeSet<String>,
    pub steps_completed: BTreeSet<String>,
    /// Commit recorded when each step completed.
    pub step_commits: BTreeMap<String, String>,
    /// `step -> tag -> fix`.
    pub fix_progress: BTreeMap<String, BTreeMap<String, FixRecord>>,
    pub last_commit: Option<String>,
}

impl ProgressFile {
    pub fn fix_count(&self) -> usize {
        self.fix_progress.values().map(BTreeMap::len).sum()
    }
}

/// Read-modify-write access to `progress.json`.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
    crate_dir: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>, crate_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            crate_dir: crate_dir.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current records; a missing or unreadable file loads as empty.
    pub fn load(&self) -> ProgressFile {
        match read_json::<ProgressFile>(&self.path) {
            Ok(progress) => progress.unwrap_or_default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable progress file; starting empty");
                ProgressFile::default()
            }
        }
    }

    fn relative(&self, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| relative_path(&self.crate_dir, f))
            .collect()
    }

    /// Record a verified fix for `step` under `tag` (e.g. `iter2`).
    pub fn save_fix_progress(
        &self,
        step: &str,
        tag: &str,
        files: &[PathBuf],
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        let mut progress = self.load();
        let files = self.relative(files);
        progress.processed.extend(files.iter().cloned());
        progress.fix_progress.entry(step.to_string()).or_default().insert(
            tag.to_string(),
            FixRecord {
                commit: checkpoint.id.clone(),
                timestamp: Utc::now(),
                files,
            },
        );
        progress.last_commit = Some(checkpoint.id.clone());
        write_json_atomic(&self.path, &progress)?;
        debug!(step, tag, commit = %checkpoint.short(), "fix progress saved");
        Ok(())
    }

    /// Mark `step` completed at `checkpoint`.
    pub fn save_step_progress(
        &self,
        step: &str,
        files: &[PathBuf],
        checkpoint: Option<&Checkpoint>,
    ) -> Result<()> {
        let mut progress = self.load();
        progress.steps_completed.insert(step.to_string());
        progress.processed.extend(self.relative(files));
        if let Some(checkpoint) = checkpoint {
            progress
                .step_commits
                .insert(step.to_string(), checkpoint.id.clone());
            progress.last_commit = Some(checkpoint.id.clone());
        }
        write_json_atomic(&self.path, &progress)
    }

    /// Commit of the latest completed step in `step_order`, for resuming.
    pub fn resume_checkpoint(&self, step_order: &[&str]) -> Option<String> {
        let progress = self.load();
        step_order
            .iter()
            .rev()
            .filter(|step| progress.steps_completed.contains(**step))
            .find_map(|step| progress.step_commits.get(*step).cloned())
    }

    /// Start over with an empty file.
    pub fn reset(&self) -> Result<()> {
        write_json_atomic(&self.path, &ProgressFile::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> ProgressStore {
        ProgressStore::new(dir.join(".c2rs/progress.json"), dir)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store(dir.path()).load(), ProgressFile::default());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{{{").unwrap();
        assert_eq!(store.load(), ProgressFile::default());
    }

    #[test]
    fn fix_progress_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let files = vec![dir.path().join("src/lib.rs")];

        store
            .save_fix_progress("build_fix", "iter1", &files, &Checkpoint::new("aaa"))
            .unwrap();
        store
            .save_fix_progress("build_fix", "iter2", &files, &Checkpoint::new("bbb"))
            .unwrap();

        let progress = store.load();
        assert_eq!(progress.fix_count(), 2);
        assert_eq!(progress.last_commit.as_deref(), Some("bbb"));
        assert!(progress.processed.contains("src/lib.rs"));
        assert_eq!(progress.fix_progress["build_fix"]["iter1"].commit, "aaa");
    }

    #[test]
    fn resume_picks_latest_completed_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .save_step_progress("clippy_elimination", &[], Some(&Checkpoint::new("c1")))
            .unwrap();
        store
            .save_step_progress("unsafe_cleanup", &[], Some(&Checkpoint::new("c2")))
            .unwrap();

        let order = ["clippy_elimination", "unsafe_cleanup", "doc_opt"];
        assert_eq!(store.resume_checkpoint(&order).as_deref(), Some("c2"));

        store.reset().unwrap();
        assert_eq!(store.resume_checkpoint(&order), None);
    }
}
