//! Detection and rollback of edits that "fix" a check by removing tests.
//!
//! Two sources feed the heuristic: the working-tree diff against the
//! pre-invocation checkpoint, and before/after file snapshots taken around
//! each mutating tool call the agent reports. The second source catches
//! shrunk files the diff cannot see (untracked files, mixed commits).

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checkpoint_store::CheckpointStore;
use crate::domain::{C2rsError, Checkpoint, RepairOptions, Result};
use crate::obs;
use crate::oracle::{AgentId, NoopObserver, Oracle, OracleRequest, ToolCallEvent, ToolCallObserver};
use crate::prompts;

const MAX_ARBITRATION_DIFF: usize = 5000;

fn test_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"#\[\s*(?:(?:tokio::)?test\b|cfg\s*\(\s*test\b)")
            .expect("test marker pattern is valid")
    })
}

/// Contents of one file before and after a tool call. `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// One suspicious removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionFinding {
    pub file: String,
    pub detail: String,
}

impl std::fmt::Display for DeletionFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.file, self.detail)
    }
}

/// Decides whether a change removed or weakened tests.
pub trait DeletionHeuristic: Send + Sync {
    fn inspect_diff(&self, diff: &str) -> Vec<DeletionFinding>;
    fn inspect_change(&self, change: &FileChange) -> Vec<DeletionFinding>;
}

/// Counts `#[test]`, `#[tokio::test]` and `#[cfg(test)]` markers.
///
/// A diff is flagged when it removes more markers than it adds anywhere in
/// the diff, so moving a test to another file is allowed. A file snapshot
/// is flagged when it ends with fewer markers, or when a file under `tests/`
/// loses more than half of its lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestMarkerHeuristic;

fn count_markers(text: &str) -> usize {
    text.lines().filter(|l| test_marker().is_match(l)).count()
}

fn is_test_path(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == "tests"))
}

impl DeletionHeuristic for TestMarkerHeuristic {
    fn inspect_diff(&self, diff: &str) -> Vec<DeletionFinding> {
        let mut current_file = String::from("unknown");
        let mut removed = Vec::new();
        let mut added = 0usize;

        for line in diff.lines() {
            if let Some(path) = line.strip_prefix("+++ ") {
                if path != "/dev/null" {
                    current_file = path.trim_start_matches("b/").to_string();
                }
                continue;
            }
            if let Some(path) = line.strip_prefix("--- ") {
                if path != "/dev/null" {
                    current_file = path.trim_start_matches("a/").to_string();
                }
                continue;
            }
            if let Some(body) = line.strip_prefix('-') {
                if test_marker().is_match(body) {
                    removed.push(DeletionFinding {
                        file: current_file.clone(),
                        detail: format!("removed `{}`", body.trim()),
                    });
                }
            } else if let Some(body) = line.strip_prefix('+') {
                if test_marker().is_match(body) {
                    added += 1;
                }
            }
        }

        if removed.len() > added {
            removed
        } else {
            Vec::new()
        }
    }

    fn inspect_change(&self, change: &FileChange) -> Vec<DeletionFinding> {
        let before = change.before.as_deref().unwrap_or_default();
        let after = change.after.as_deref().unwrap_or_default();
        let file = change.path.display().to_string();
        let mut findings = Vec::new();

        let (markers_before, markers_after) = (count_markers(before), count_markers(after));
        if markers_after < markers_before {
            findings.push(DeletionFinding {
                file: file.clone(),
                detail: format!("test markers dropped from {markers_before} to {markers_after}"),
            });
        }

        let (lines_before, lines_after) = (before.lines().count(), after.lines().count());
        if is_test_path(&change.path) && lines_before > 0 && lines_after * 2 < lines_before {
            findings.push(DeletionFinding {
                file,
                detail: format!("test file shrank from {lines_before} to {lines_after} lines"),
            });
        }
        findings
    }
}

/// Second opinion on a suspected deletion.
#[async_trait]
pub trait DeletionArbiter: Send + Sync {
    /// `true` when the removal is legitimate and must be kept.
    async fn approve(&self, findings: &[DeletionFinding], diff: &str) -> bool;
}

/// Asks the oracle using the `<!!!YES!!!>` / `<!!!NO!!!>` protocol.
///
/// Anything but an explicit YES without a NO means roll back.
pub struct OracleArbiter {
    oracle: Arc<dyn Oracle>,
    options: RepairOptions,
}

impl OracleArbiter {
    pub fn new(oracle: Arc<dyn Oracle>, options: RepairOptions) -> Self {
        Self { oracle, options }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n... (diff truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl DeletionArbiter for OracleArbiter {
    async fn approve(&self, findings: &[DeletionFinding], diff: &str) -> bool {
        let lines: Vec<String> = findings.iter().map(ToString::to_string).collect();
        let prompt = prompts::deletion_arbitration(&lines, &truncate_chars(diff, MAX_ARBITRATION_DIFF));
        let request = OracleRequest::new("test-deletion review", prompt).with_options(&self.options);
        match self.oracle.invoke(&request, &NoopObserver).await {
            Ok(answer) if answer.contains(prompts::NO_MARKER) => false,
            Ok(answer) if answer.contains(prompts::YES_MARKER) => true,
            Ok(_) => {
                warn!("arbiter answer carried no verdict marker; rolling back");
                false
            }
            Err(e) => {
                warn!(error = %e, "arbiter invocation failed; rolling back");
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct AgentTrace {
    checkpoint: Option<Checkpoint>,
    pending: HashMap<PathBuf, Option<String>>,
    changes: Vec<FileChange>,
}

/// Watches agent invocations and reverts the ones that delete tests.
pub struct RegressionGuard {
    store: Arc<dyn CheckpointStore>,
    heuristic: Box<dyn DeletionHeuristic>,
    arbiter: Option<Arc<dyn DeletionArbiter>>,
    work_dir: PathBuf,
    traces: Mutex<HashMap<AgentId, AgentTrace>>,
}

impl RegressionGuard {
    pub fn new(store: Arc<dyn CheckpointStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            heuristic: Box::new(TestMarkerHeuristic),
            arbiter: None,
            work_dir: work_dir.into(),
            traces: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_heuristic(mut self, heuristic: Box<dyn DeletionHeuristic>) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn with_arbiter(mut self, arbiter: Arc<dyn DeletionArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    fn traces(&self) -> std::sync::MutexGuard<'_, HashMap<AgentId, AgentTrace>> {
        self.traces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    /// Start tracking `agent_id`; returns the checkpoint current right now.
    pub fn before_invocation(&self, agent_id: AgentId) -> Option<Checkpoint> {
        let checkpoint = self.store.current_checkpoint();
        self.traces().insert(
            agent_id,
            AgentTrace {
                checkpoint: checkpoint.clone(),
                ..AgentTrace::default()
            },
        );
        checkpoint
    }

    /// Latest checkpoint observed for `agent_id`.
    pub fn tracked_checkpoint(&self, agent_id: AgentId) -> Option<Checkpoint> {
        self.traces().get(&agent_id).and_then(|t| t.checkpoint.clone())
    }

    /// Inspect everything `agent_id` did since `checkpoint_before`.
    ///
    /// Rolls back and returns `true` when tests were removed and the arbiter
    /// (if any) does not approve. Returns `false` without a checkpoint,
    /// since there is nothing to roll back to.
    pub async fn check_and_handle_deletion(
        &self,
        checkpoint_before: Option<&Checkpoint>,
        agent_id: AgentId,
    ) -> Result<bool> {
        let trace = self.traces().remove(&agent_id).unwrap_or_default();
        let Some(checkpoint) = checkpoint_before else {
            debug!(agent = %agent_id, "no checkpoint; skipping deletion check");
            return Ok(false);
        };

        let diff = self.store.diff_since(checkpoint)?;
        let mut findings = self.heuristic.inspect_diff(&diff);
        for change in &trace.changes {
            for finding in self.heuristic.inspect_change(change) {
                if !findings.contains(&finding) {
                    findings.push(finding);
                }
            }
        }
        if findings.is_empty() {
            return Ok(false);
        }

        if let Some(arbiter) = &self.arbiter {
            if arbiter.approve(&findings, &diff).await {
                debug!(agent = %agent_id, findings = findings.len(), "test removal approved");
                return Ok(false);
            }
        }

        let reason = findings[0].to_string();
        if !self.store.reset_to(checkpoint) {
            return Err(C2rsError::RollbackFailed {
                checkpoint: checkpoint.id.clone(),
            });
        }
        obs::emit_guard_rollback(&agent_id.to_string(), checkpoint.short(), &reason);
        Ok(true)
    }
}

fn read_optional(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

impl ToolCallObserver for RegressionGuard {
    fn on_tool_call(&self, event: &ToolCallEvent) {
        if !event.is_mutating() {
            return;
        }
        let current = self.store.current_checkpoint();
        let mut traces = self.traces();
        let trace = traces.entry(event.agent_id).or_default();
        if current.is_some() {
            trace.checkpoint = current;
        }
        for path in &event.paths {
            let resolved = self.resolve(path);
            trace
                .pending
                .entry(path.clone())
                .or_insert_with(|| read_optional(&resolved));
        }
    }

    fn after_tool_call(&self, event: &ToolCallEvent) {
        if !event.is_mutating() {
            return;
        }
        let mut traces = self.traces();
        let trace = traces.entry(event.agent_id).or_default();
        for path in &event.paths {
            let Some(before) = trace.pending.remove(path) else {
                continue;
            };
            let after = read_optional(&self.resolve(path));
            if before != after {
                trace.changes.push(FileChange {
                    path: path.clone(),
                    before,
                    after,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint_store::GitCheckpointStore;
    use std::process::Command as StdCommand;

    const TEST_FILE: &str = "#[test]\nfn adds() {\n    assert_eq!(2 + 2, 4);\n}\n\n#[test]\nfn subs() {\n    assert_eq!(2 - 2, 0);\n}\n";

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed");
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        std::fs::write(dir.path().join("tests/it.rs"), TEST_FILE).unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn f() {}\n").unwrap();
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-m", "initial"]);
        dir
    }

    struct Fixed(bool);

    #[async_trait]
    impl DeletionArbiter for Fixed {
        async fn approve(&self, _: &[DeletionFinding], _: &str) -> bool {
            self.0
        }
    }

    #[test]
    fn diff_with_removed_marker_is_flagged() {
        let diff = "diff --git a/tests/it.rs b/tests/it.rs\n--- a/tests/it.rs\n+++ b/tests/it.rs\n@@ -1,4 +0,0 @@\n-#[test]\n-fn adds() {\n-}\n";
        let findings = TestMarkerHeuristic.inspect_diff(diff);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].file, "tests/it.rs");
    }

    #[test]
    fn test_moved_between_files_is_not_flagged() {
        let diff = "--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1 +0,0 @@\n-    #[test]\n--- a/src/b.rs\n+++ b/src/b.rs\n@@ -0,0 +1 @@\n+    #[test]\n";
        assert!(TestMarkerHeuristic.inspect_diff(diff).is_empty());
    }

    #[test]
    fn tokio_and_cfg_markers_count() {
        let diff = "--- a/src/lib.rs\n+++ b/src/lib.rs\n-#[cfg(test)]\n-#[tokio::test(flavor = \"multi_thread\")]\n";
        assert_eq!(TestMarkerHeuristic.inspect_diff(diff).len(), 2);
    }

    #[test]
    fn shrunk_test_file_is_flagged() {
        let change = FileChange {
            path: PathBuf::from("tests/it.rs"),
            before: Some(TEST_FILE.to_string()),
            after: Some("#[test]\nfn adds() {}\n#[test]\nfn subs() {}\n".to_string()),
        };
        let findings = TestMarkerHeuristic.inspect_change(&change);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].detail.contains("shrank"));
    }

    #[test]
    fn ordinary_source_edit_is_not_flagged() {
        let change = FileChange {
            path: PathBuf::from("src/lib.rs"),
            before: Some("fn a() {}\nfn b() {}\nfn c() {}\n".to_string()),
            after: Some("fn a() {}\n".to_string()),
        };
        assert!(TestMarkerHeuristic.inspect_change(&change).is_empty());
    }

    #[tokio::test]
    async fn deleted_tests_are_rolled_back() {
        let repo = make_git_repo();
        let store = Arc::new(GitCheckpointStore::new(repo.path()));
        let guard = RegressionGuard::new(store, repo.path());
        let agent = AgentId::new();
        let before = guard.before_invocation(agent);

        std::fs::write(repo.path().join("tests/it.rs"), "").unwrap();
        assert!(guard
            .check_and_handle_deletion(before.as_ref(), agent)
            .await
            .unwrap());
        assert_eq!(
            std::fs::read_to_string(repo.path().join("tests/it.rs")).unwrap(),
            TEST_FILE
        );
    }

    #[tokio::test]
    async fn legitimate_edit_is_kept() {
        let repo = make_git_repo();
        let store = Arc::new(GitCheckpointStore::new(repo.path()));
        let guard = RegressionGuard::new(store, repo.path());
        let agent = AgentId::new();
        let before = guard.before_invocation(agent);

        std::fs::write(repo.path().join("lib.rs"), "pub fn f() -> u8 { 1 }\n").unwrap();
        assert!(!guard
            .check_and_handle_deletion(before.as_ref(), agent)
            .await
            .unwrap());
        assert!(std::fs::read_to_string(repo.path().join("lib.rs"))
            .unwrap()
            .contains("-> u8"));
    }

    #[tokio::test]
    async fn arbiter_can_approve_removal() {
        let repo = make_git_repo();
        let store = Arc::new(GitCheckpointStore::new(repo.path()));
        let guard = RegressionGuard::new(store, repo.path()).with_arbiter(Arc::new(Fixed(true)));
        let agent = AgentId::new();
        let before = guard.before_invocation(agent);

        std::fs::write(repo.path().join("tests/it.rs"), "").unwrap();
        assert!(!guard
            .check_and_handle_deletion(before.as_ref(), agent)
            .await
            .unwrap());
        assert_eq!(
            std::fs::read_to_string(repo.path().join("tests/it.rs")).unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn no_checkpoint_means_no_rollback() {
        let repo = make_git_repo();
        let store = Arc::new(GitCheckpointStore::new(repo.path()));
        let guard = RegressionGuard::new(store, repo.path());
        std::fs::write(repo.path().join("tests/it.rs"), "").unwrap();
        assert!(!guard
            .check_and_handle_deletion(None, AgentId::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn tool_call_snapshots_catch_untracked_test_shrink() {
        let repo = make_git_repo();
        let store = Arc::new(GitCheckpointStore::new(repo.path()));
        let guard = RegressionGuard::new(store, repo.path());
        let agent = AgentId::new();
        let before = guard.before_invocation(agent);

        // Untracked, so invisible to the tracked-file diff.
        std::fs::write(repo.path().join("tests/extra.rs"), TEST_FILE).unwrap();
        let event = ToolCallEvent::new(agent, "edit_file", vec![PathBuf::from("tests/extra.rs")]);
        guard.on_tool_call(&event);
        assert_eq!(
            guard.tracked_checkpoint(agent).map(|c| c.id),
            before.as_ref().map(|c| c.id.clone())
        );
        std::fs::write(repo.path().join("tests/extra.rs"), "// gone\n").unwrap();
        guard.after_tool_call(&event);

        assert!(guard
            .check_and_handle_deletion(before.as_ref(), agent)
            .await
            .unwrap());
        assert!(!repo.path().join("tests/extra.rs").exists());
    }
}
