//! Shared fixtures: throwaway git repos, a scripted agent and a build that
//! passes when a file contains a marker.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use c2rs_core::{
    BuildExecutor, BuildOutcome, BuildRunner, C2rsError, CheckpointStore, GitCheckpointStore,
    Oracle, OracleRequest, RegressionGuard, RepairLoop, RepairOptions, Result, ToolCallEvent,
    ToolCallObserver,
};

pub const TESTS_FILE: &str =
    "#[test]\nfn adds() {\n    assert_eq!(2 + 2, 4);\n}\n\n#[test]\nfn subs() {\n    assert_eq!(2 - 2, 0);\n}\n";
pub const BROKEN: &str = "pub fn answer() -> u32 { undefined_value }\n";
pub const FIXED: &str = "pub fn answer() -> u32 { 42 } // fixed\n";

pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {args:?} failed");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Repo with `src/lib.rs` and `tests/it.rs` committed.
pub fn make_git_repo(lib: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::create_dir_all(dir.path().join("tests")).unwrap();
    std::fs::write(dir.path().join("src/lib.rs"), lib).unwrap();
    std::fs::write(dir.path().join("tests/it.rs"), TESTS_FILE).unwrap();
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "-m", "initial"]);
    dir
}

pub fn head(repo: &Path) -> String {
    run_git(repo, &["rev-parse", "HEAD"])
}

pub fn commit_count(repo: &Path) -> usize {
    run_git(repo, &["rev-list", "--count", "HEAD"]).parse().unwrap()
}

pub fn read(repo: &Path, file: &str) -> String {
    std::fs::read_to_string(repo.join(file)).unwrap()
}

/// What the scripted agent does on one invocation.
#[derive(Debug, Clone)]
pub enum Action {
    Reply(String),
    /// Write files (reporting each as a `write_file` tool call), then reply.
    Edit(Vec<(String, String)>, String),
    Fail(String),
}

impl Action {
    pub fn write(path: &str, content: &str) -> Self {
        Action::Edit(vec![(path.to_string(), content.to_string())], String::new())
    }

    pub fn reply(text: &str) -> Self {
        Action::Reply(text.to_string())
    }
}

pub struct ScriptedOracle {
    work_dir: PathBuf,
    script: Mutex<VecDeque<Action>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(work_dir: &Path, script: Vec<Action>) -> Arc<Self> {
        Arc::new(Self {
            work_dir: work_dir.to_path_buf(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.label.clone())
            .collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn invoke(&self, request: &OracleRequest, observer: &dyn ToolCallObserver) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let action = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Action::Fail("script exhausted".to_string()));
        match action {
            Action::Reply(text) => Ok(text),
            Action::Fail(message) => Err(C2rsError::Oracle(message)),
            Action::Edit(files, reply) => {
                for (path, content) in files {
                    let event = ToolCallEvent::new(request.agent_id, "write_file", vec![PathBuf::from(&path)]);
                    observer.on_tool_call(&event);
                    let full = self.work_dir.join(&path);
                    if let Some(parent) = full.parent() {
                        std::fs::create_dir_all(parent).unwrap();
                    }
                    std::fs::write(full, content).unwrap();
                    observer.after_tool_call(&event);
                }
                Ok(reply)
            }
        }
    }
}

/// Passes iff `file` contains `needle`.
pub struct ContentBuild {
    file: String,
    needle: String,
    runs: Mutex<u32>,
}

impl ContentBuild {
    pub fn new(file: &str, needle: &str) -> Arc<Self> {
        Arc::new(Self {
            file: file.to_string(),
            needle: needle.to_string(),
            runs: Mutex::new(0),
        })
    }

    pub fn runs(&self) -> u32 {
        *self.runs.lock().unwrap()
    }
}

#[async_trait]
impl BuildExecutor for ContentBuild {
    async fn execute(&self, work_dir: &Path, _timeout: Option<Duration>) -> Result<BuildOutcome> {
        *self.runs.lock().unwrap() += 1;
        let content = std::fs::read_to_string(work_dir.join(&self.file)).unwrap_or_default();
        if content.contains(&self.needle) {
            Ok(BuildOutcome::passed("test result: ok"))
        } else {
            Ok(BuildOutcome::failed(format!(
                "error[E0425]: cannot find value in {}\n  --> {}:1:26",
                self.file, self.file
            )))
        }
    }
}

pub struct Harness {
    pub store: Arc<GitCheckpointStore>,
    pub build: Arc<ContentBuild>,
    pub oracle: Arc<ScriptedOracle>,
}

impl Harness {
    pub fn new(repo: &Path, script: Vec<Action>) -> Self {
        Self {
            store: Arc::new(GitCheckpointStore::new(repo)),
            build: ContentBuild::new("src/lib.rs", "fixed"),
            oracle: ScriptedOracle::new(repo, script),
        }
    }

    pub fn repair_loop(&self, repo: &Path, options: RepairOptions) -> RepairLoop {
        let store: Arc<dyn CheckpointStore> = self.store.clone();
        let guard = Arc::new(RegressionGuard::new(store.clone(), repo));
        RepairLoop::new(
            repo,
            options.clone(),
            BuildRunner::new(self.build.clone(), &options),
            store,
            guard,
            self.oracle.clone(),
        )
    }
}
