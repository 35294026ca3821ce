//! Build/test execution with timeout and global budget accounting.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{C2rsError, RepairOptions, RepairStats, Result};
use crate::metrics::METRICS;
use crate::obs;

/// How long output readers may keep draining after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

const BUDGET_EXHAUSTED: &str = "budget exhausted";

/// Structured result of one build/test invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub passed: bool,

    /// Combined stdout and stderr.
    pub diagnostic: String,

    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    pub timed_out: bool,

    /// Set when the global budget prevented the build from running.
    #[serde(default)]
    pub skipped: bool,
}

impl BuildOutcome {
    pub fn passed(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostic: diagnostic.into(),
            exit_code: Some(0),
            duration_ms: 0,
            timed_out: false,
            skipped: false,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: diagnostic.into(),
            exit_code: None,
            duration_ms: 0,
            timed_out: false,
            skipped: false,
        }
    }

    pub fn budget_exhausted() -> Self {
        Self {
            skipped: true,
            ..Self::failed(BUDGET_EXHAUSTED)
        }
    }

    /// First non-blank diagnostic line, or `"failed"`.
    pub fn first_line(&self) -> &str {
        self.diagnostic
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("failed")
    }
}

/// Runs the project's build/test command once.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn execute(&self, work_dir: &Path, timeout: Option<Duration>) -> Result<BuildOutcome>;
}

/// Executes a command line as a subprocess of `work_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellBuildExecutor {
    program: String,
    args: Vec<String>,
}

impl ShellBuildExecutor {
    /// `command[0]` is the program; the rest are its arguments.
    pub fn new(command: Vec<String>) -> Self {
        let mut parts = command.into_iter();
        let program = parts.next().unwrap_or_else(|| "cargo".to_string());
        Self {
            program,
            args: parts.collect(),
        }
    }

    /// Run `cmd` through `sh -c`.
    pub fn shell(cmd: &str) -> Self {
        Self::new(vec!["sh".to_string(), "-c".to_string(), cmd.to_string()])
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for ShellBuildExecutor {
    fn default() -> Self {
        Self::new(vec!["cargo".into(), "test".into(), "-q".into()])
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, buf: Arc<Mutex<Vec<u8>>>) {
    let Some(mut reader) = reader else { return };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
        }
    }
}

#[async_trait]
impl BuildExecutor for ShellBuildExecutor {
    async fn execute(&self, work_dir: &Path, timeout: Option<Duration>) -> Result<BuildOutcome> {
        let start = Instant::now();
        METRICS.inc_builds();

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BuildOutcome {
                    duration_ms: start.elapsed().as_millis() as u64,
                    ..BuildOutcome::failed(format!("command not found: {}: {e}", self.display()))
                });
            }
            Err(source) => {
                return Err(C2rsError::Spawn {
                    command: self.display(),
                    source,
                })
            }
        };

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut stdout_task = tokio::spawn(drain(child.stdout.take(), stdout_buf.clone()));
        let mut stderr_task = tokio::spawn(drain(child.stderr.take(), stderr_buf.clone()));

        let (status, timed_out) = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => (Some(status?), false),
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(READER_GRACE, child.wait()).await;
                    (None, true)
                }
            },
            None => (Some(child.wait().await?), false),
        };

        // A grandchild may still hold the pipes open; stop waiting after the grace.
        let _ = tokio::time::timeout(READER_GRACE, &mut stdout_task).await;
        let _ = tokio::time::timeout(READER_GRACE, &mut stderr_task).await;
        stdout_task.abort();
        stderr_task.abort();

        let mut combined = String::from_utf8_lossy(&stdout_buf.lock().await).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf.lock().await).into_owned();
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if timed_out {
            let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
            return Ok(BuildOutcome {
                passed: false,
                diagnostic: format!("{} timed out after {secs} seconds\nOutput:\n{combined}", self.display()),
                exit_code: None,
                duration_ms,
                timed_out: true,
                skipped: false,
            });
        }

        let status = status.ok_or_else(|| C2rsError::Spawn {
            command: self.display(),
            source: std::io::Error::other("child exited without status"),
        })?;
        debug!(command = %self.display(), success = status.success(), duration_ms, "build finished");
        Ok(BuildOutcome {
            passed: status.success(),
            diagnostic: combined,
            exit_code: status.code(),
            duration_ms,
            timed_out: false,
            skipped: false,
        })
    }
}

/// Budget-aware front for a [`BuildExecutor`].
#[derive(Clone)]
pub struct BuildRunner {
    executor: Arc<dyn BuildExecutor>,
    max_checks: Option<u64>,
    timeout: Option<Duration>,
}

impl BuildRunner {
    pub fn new(executor: Arc<dyn BuildExecutor>, options: &RepairOptions) -> Self {
        Self {
            executor,
            max_checks: options.max_checks,
            timeout: (options.build_timeout_secs > 0)
                .then(|| Duration::from_secs(options.build_timeout_secs)),
        }
    }

    pub fn max_checks(&self) -> Option<u64> {
        self.max_checks
    }

    /// Run one build in `work_dir`.
    ///
    /// Refuses to run once the global budget is spent. Otherwise the check
    /// is counted before the outcome is known, so timeouts and spawn
    /// failures use budget too.
    pub async fn run(&self, work_dir: &Path, stats: &mut RepairStats) -> Result<BuildOutcome> {
        if stats.budget_exhausted(self.max_checks) {
            obs::emit_budget_exhausted(stats.checks_performed(), self.max_checks.unwrap_or_default());
            return Ok(BuildOutcome::budget_exhausted());
        }
        stats.record_check();
        self.executor.execute(work_dir, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    #[async_trait]
    impl BuildExecutor for Counting {
        async fn execute(&self, _: &Path, _: Option<Duration>) -> Result<BuildOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(BuildOutcome::failed("error[E0308]: mismatched types"))
        }
    }

    fn cmd(parts: &[&str]) -> ShellBuildExecutor {
        ShellBuildExecutor::new(parts.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_first_line() {
        let outcome = BuildOutcome::failed("\n  error: expected `;`\nmore");
        assert_eq!(outcome.first_line(), "error: expected `;`");
        assert_eq!(BuildOutcome::failed("").first_line(), "failed");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = cmd(&["echo", "hello"]).execute(dir.path(), None).await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.diagnostic.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command_combines_streams() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ShellBuildExecutor::shell("echo out; echo err >&2; exit 3")
            .execute(dir.path(), Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.diagnostic.contains("out"));
        assert!(outcome.diagnostic.contains("err"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ShellBuildExecutor::shell("echo partial; exec sleep 10")
            .execute(dir.path(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.timed_out);
        assert!(outcome.diagnostic.contains("timed out after 1 seconds"));
        assert!(outcome.diagnostic.contains("partial"));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_failed_build() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = cmd(&["c2rs-no-such-build-tool"])
            .execute(dir.path(), None)
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.diagnostic.contains("command not found"));
    }

    #[tokio::test]
    async fn test_runner_counts_every_check_and_respects_budget() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Counting(AtomicU32::new(0)));
        let options = RepairOptions {
            max_checks: Some(2),
            ..RepairOptions::default()
        };
        let runner = BuildRunner::new(executor.clone(), &options);
        let mut stats = RepairStats::new();

        assert!(!runner.run(dir.path(), &mut stats).await.unwrap().skipped);
        assert!(!runner.run(dir.path(), &mut stats).await.unwrap().skipped);
        let third = runner.run(dir.path(), &mut stats).await.unwrap();

        assert!(third.skipped);
        assert_eq!(third.diagnostic, "budget exhausted");
        assert_eq!(stats.checks_performed(), 2);
        assert_eq!(executor.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let runner = BuildRunner::new(
            Arc::new(ShellBuildExecutor::default()),
            &RepairOptions::default(),
        );
        assert!(runner.timeout.is_none());
    }
}
