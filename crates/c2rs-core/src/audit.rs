//! Auditable repair logs with digest verification.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{C2rsError, Result};

const ARTIFACT_FILE: &str = "repair.json";
const DIGEST_FILE: &str = "repair.digest";

/// How one fix attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Verification passed and the fix was committed.
    Fixed,
    /// Verification failed; the attempt was rolled back.
    VerifyFailed,
    /// Test removal detected twice; the attempt was abandoned.
    Regressed,
    /// The agent invocation itself failed.
    OracleFailed,
}

/// Final state of one repair call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    AlreadyPassing,
    Fixed,
    RetriesExhausted,
    BudgetExhausted,
}

impl RepairOutcome {
    pub fn succeeded(self) -> bool {
        matches!(self, Self::AlreadyPassing | Self::Fixed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyPassing => "already_passing",
            Self::Fixed => "fixed",
            Self::RetriesExhausted => "retries_exhausted",
            Self::BudgetExhausted => "budget_exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Regression rollbacks during this attempt (0, 1 or 2).
    pub regression_rollbacks: u32,
    /// First line of the diagnostic the attempt tried to fix.
    pub diagnostic: String,
}

/// Full timeline of one `RepairLoop::repair` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairLog {
    pub run_id: String,
    pub scope: Vec<String>,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: Option<RepairOutcome>,
    pub checks_before: u64,
    pub checks_after: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RepairLog {
    pub fn new(run_id: impl Into<String>, scope: Vec<String>, checks_before: u64) -> Self {
        Self {
            run_id: run_id.into(),
            scope,
            attempts: Vec::new(),
            outcome: None,
            checks_before,
            checks_after: checks_before,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub fn finish(&mut self, outcome: RepairOutcome, checks_after: u64) {
        self.outcome = Some(outcome);
        self.checks_after = checks_after;
        self.finished_at = Some(Utc::now());
    }

    pub fn checks_used(&self) -> u64 {
        self.checks_after.saturating_sub(self.checks_before)
    }
}

/// Hex SHA-256 of `data`.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Persist `<dir>/<run_id>/repair.json` and `<dir>/<run_id>/repair.digest`.
pub fn write_repair_artifact(log: &RepairLog, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&log.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join(ARTIFACT_FILE);
    let json = serde_json::to_vec_pretty(log)?;
    std::fs::write(&artifact_path, &json)?;
    std::fs::write(run_dir.join(DIGEST_FILE), content_digest(&json).as_bytes())?;

    Ok(artifact_path)
}

/// Read and verify `<dir>/<run_id>/repair.json` integrity.
pub fn read_repair_artifact(run_id: &str, dir: &Path) -> Result<RepairLog> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join(ARTIFACT_FILE))?;
    let digest = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;
    let actual = content_digest(&json);
    if digest.trim() != actual {
        return Err(C2rsError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
