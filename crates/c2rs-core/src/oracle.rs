//! Boundary to the external code-generation agent.
//!
//! The core only ever talks to the agent through [`Oracle::invoke`]. Agents
//! that can report their own file edits do so through a
//! [`ToolCallObserver`]; agents that cannot are covered by the working-tree
//! diff in [`crate::regression_guard`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::domain::{C2rsError, RepairOptions, Result};
use crate::metrics::METRICS;

/// Tools whose calls may change files on disk.
pub const EDIT_TOOLS: &[&str] = &["edit_file", "rewrite_file", "apply_patch", "write_file"];

/// Identity of one logical agent invocation (kept across its retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One request to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub agent_id: AgentId,
    /// Human-readable purpose, e.g. `build-fix iter=2`.
    pub label: String,
    pub prompt: String,
    pub model_group: Option<String>,
    pub non_interactive: bool,
}

impl OracleRequest {
    pub fn new(label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_id: AgentId::new(),
            label: label.into(),
            prompt: prompt.into(),
            model_group: None,
            non_interactive: true,
        }
    }

    pub fn with_options(mut self, options: &RepairOptions) -> Self {
        self.model_group = options.model_group.clone();
        self.non_interactive = options.non_interactive;
        self
    }

    /// Same request and agent identity, labelled as a retry.
    pub fn retry(&self) -> Self {
        Self {
            label: format!("{} retry", self.label),
            ..self.clone()
        }
    }
}

/// A single tool call reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub agent_id: AgentId,
    pub tool: String,
    /// Files the tool touches, relative to the crate root or absolute.
    pub paths: Vec<PathBuf>,
}

impl ToolCallEvent {
    pub fn new(agent_id: AgentId, tool: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            agent_id,
            tool: tool.into(),
            paths,
        }
    }

    pub fn is_mutating(&self) -> bool {
        EDIT_TOOLS.contains(&self.tool.as_str())
    }
}

/// Callbacks the agent wrapper fires around each tool call.
pub trait ToolCallObserver: Send + Sync {
    fn on_tool_call(&self, event: &ToolCallEvent);
    fn after_tool_call(&self, event: &ToolCallEvent);
}

/// Observer for read-only invocations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ToolCallObserver for NoopObserver {
    fn on_tool_call(&self, _event: &ToolCallEvent) {}
    fn after_tool_call(&self, _event: &ToolCallEvent) {}
}

/// The external generation collaborator.
///
/// Always returns some text on success. Failures of the invocation itself
/// are errors; malformed content is not.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn invoke(&self, request: &OracleRequest, observer: &dyn ToolCallObserver)
        -> Result<String>;
}

/// Runs an agent command line in the crate directory.
///
/// The prompt goes to stdin and stdout is the response. Request metadata is
/// exported as `C2RS_AGENT_ID`, `C2RS_AGENT_LABEL`, `C2RS_MODEL_GROUP` and
/// `C2RS_NON_INTERACTIVE`.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl CommandOracle {
    pub fn new(command: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        let mut parts = command.into_iter();
        Self {
            program: parts.next().unwrap_or_default(),
            args: parts.collect(),
            work_dir: work_dir.into(),
        }
    }

    /// Run `cmd` through `sh -c`.
    pub fn shell(cmd: &str, work_dir: impl Into<PathBuf>) -> Self {
        Self::new(vec!["sh".into(), "-c".into(), cmd.into()], work_dir)
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Oracle for CommandOracle {
    async fn invoke(
        &self,
        request: &OracleRequest,
        _observer: &dyn ToolCallObserver,
    ) -> Result<String> {
        if self.program.is_empty() {
            return Err(C2rsError::Oracle("empty oracle command".to_string()));
        }
        METRICS.inc_oracle_invocations();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.work_dir)
            .env("C2RS_AGENT_ID", request.agent_id.to_string())
            .env("C2RS_AGENT_LABEL", &request.label)
            .env(
                "C2RS_MODEL_GROUP",
                request.model_group.as_deref().unwrap_or_default(),
            )
            .env(
                "C2RS_NON_INTERACTIVE",
                if request.non_interactive { "1" } else { "0" },
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| C2rsError::Spawn {
                command: self.display(),
                source,
            })?;

        let stdin = child.stdin.take();
        let prompt = request.prompt.clone();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // The agent may exit without reading everything.
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        });

        let output = child.wait_with_output().await?;
        let _ = writer.await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(C2rsError::Oracle(format!(
                "`{}` exited with {}: {}",
                request.label,
                output.status,
                stderr.lines().next().unwrap_or_default()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
