//! The bounded build-fix loop and the step wrapper built on it.
//!
//! Per `repair` call:
//!
//! 1. stop when the global check budget is spent
//! 2. build; stop with success when it passes
//! 3. count an attempt; stop when `max_retries` is exceeded
//! 4. commit the working tree (if dirty) and remember it as the checkpoint
//! 5. ask the agent for a minimal fix
//! 6. let the regression guard inspect it (one retry after a rollback; a
//!    second detection fails the attempt and goes back to 3)
//! 7. build again; commit on success, otherwise roll back and go to 1
//!
//! At every return the working tree is either verified passing or back at
//! the checkpoint the failed attempt started from.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::{write_repair_artifact, AttemptOutcome, AttemptRecord, RepairLog, RepairOutcome};
use crate::build_runner::{BuildOutcome, BuildRunner};
use crate::checkpoint_store::CheckpointStore;
use crate::domain::{C2rsError, Checkpoint, RepairOptions, RepairStats, Result};
use crate::obs;
use crate::oracle::{Oracle, OracleRequest};
use crate::progress::ProgressStore;
use crate::prompts;
use crate::regression_guard::RegressionGuard;
use crate::workspace::relative_path;

const BUILD_FIX_STEP: &str = "build_fix";
const DEFAULT_BUILD_COMMAND: &str = "cargo test -q";

/// Result of one guarded agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// The agent finished and the guard kept its edits.
    Completed { regression_rollbacks: u32 },
    /// Tests were removed on the first try and again on the retry.
    Regressed,
    /// The invocation itself failed; its edits were discarded.
    Failed(String),
}

pub struct RepairLoop {
    crate_dir: PathBuf,
    options: RepairOptions,
    build: BuildRunner,
    build_command: String,
    store: Arc<dyn CheckpointStore>,
    guard: Arc<RegressionGuard>,
    oracle: Arc<dyn Oracle>,
    progress: Option<ProgressStore>,
    additional_notes: String,
    audit_dir: Option<PathBuf>,
}

impl RepairLoop {
    pub fn new(
        crate_dir: impl Into<PathBuf>,
        options: RepairOptions,
        build: BuildRunner,
        store: Arc<dyn CheckpointStore>,
        guard: Arc<RegressionGuard>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        Self {
            crate_dir: crate_dir.into(),
            options,
            build,
            build_command: DEFAULT_BUILD_COMMAND.to_string(),
            store,
            guard,
            oracle,
            progress: None,
            additional_notes: String::new(),
            audit_dir: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressStore) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_additional_notes(mut self, notes: impl Into<String>) -> Self {
        self.additional_notes = notes.into();
        self
    }

    /// Write a [`RepairLog`] artifact per `repair` call under `dir`.
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    /// Command named in fix prompts.
    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = command.into();
        self
    }

    pub fn crate_dir(&self) -> &Path {
        &self.crate_dir
    }

    pub fn options(&self) -> &RepairOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn oracle(&self) -> &Arc<dyn Oracle> {
        &self.oracle
    }

    pub fn additional_notes(&self) -> &str {
        &self.additional_notes
    }

    fn scope_labels(&self, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| relative_path(&self.crate_dir, f))
            .collect()
    }

    /// Commit whatever is in the working tree so a later reset returns to it.
    ///
    /// Falls back to HEAD (or nothing) when git refuses the commit.
    fn checkpoint_working_tree(&self, message: &str) -> Option<Checkpoint> {
        match self.store.commit(message) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(error = %e, "could not checkpoint working tree; falling back to HEAD");
                self.store.current_checkpoint()
            }
        }
    }

    /// Reset to `checkpoint`, or warn when there is none to go back to.
    fn rollback(&self, checkpoint: Option<&Checkpoint>) -> Result<()> {
        match checkpoint {
            Some(cp) if self.store.reset_to(cp) => Ok(()),
            Some(cp) => Err(C2rsError::RollbackFailed {
                checkpoint: cp.id.clone(),
            }),
            None => {
                warn!("no checkpoint to roll back to; working tree left as is");
                Ok(())
            }
        }
    }

    async fn invoke_once(
        &self,
        request: &OracleRequest,
        checkpoint_before: Option<&Checkpoint>,
    ) -> Result<std::result::Result<bool, String>> {
        self.guard.before_invocation(request.agent_id);
        match self.oracle.invoke(request, self.guard.as_ref()).await {
            Ok(_) => {}
            Err(C2rsError::Oracle(message)) => {
                warn!(label = %request.label, error = %message, "agent invocation failed");
                self.rollback(checkpoint_before)?;
                return Ok(Err(message));
            }
            Err(e) => return Err(e),
        }
        let rolled_back = self
            .guard
            .check_and_handle_deletion(checkpoint_before, request.agent_id)
            .await?;
        Ok(Ok(rolled_back))
    }

    /// Invoke the agent under the regression guard.
    ///
    /// A detected test removal earns exactly one re-invocation with the same
    /// request; a second detection is [`Invocation::Regressed`].
    pub async fn invoke_guarded(
        &self,
        request: &OracleRequest,
        checkpoint_before: Option<&Checkpoint>,
    ) -> Result<Invocation> {
        match self.invoke_once(request, checkpoint_before).await? {
            Err(message) => return Ok(Invocation::Failed(message)),
            Ok(false) => {
                return Ok(Invocation::Completed {
                    regression_rollbacks: 0,
                })
            }
            Ok(true) => {}
        }

        let retry = request.retry();
        info!(label = %retry.label, "re-invoking agent after test removal rollback");
        match self.invoke_once(&retry, checkpoint_before).await? {
            Err(message) => Ok(Invocation::Failed(message)),
            Ok(false) => Ok(Invocation::Completed {
                regression_rollbacks: 1,
            }),
            Ok(true) => Ok(Invocation::Regressed),
        }
    }

    /// Drive the crate back to a passing build, touching `scope` first.
    ///
    /// Returns `Ok(false)` when retries or the global budget run out; the
    /// reason is appended to `stats`. Only environment faults are errors.
    pub async fn repair(&self, scope: &[PathBuf], stats: &mut RepairStats) -> Result<bool> {
        let run_id = format!("repair-{}", Uuid::new_v4());
        self.repair_run(&run_id, scope, stats).await
    }

    #[instrument(name = "c2rs.run", skip_all, fields(run_id = %run_id))]
    async fn repair_run(&self, run_id: &str, scope: &[PathBuf], stats: &mut RepairStats) -> Result<bool> {
        let labels = self.scope_labels(scope);
        obs::emit_repair_started(run_id, labels.len(), stats.checks_performed());

        let mut log = RepairLog::new(run_id, labels.clone(), stats.checks_performed());
        let outcome = self.run_attempts(scope, &labels, stats, &mut log).await?;
        log.finish(outcome, stats.checks_performed());

        if let Some(dir) = &self.audit_dir {
            if let Err(e) = write_repair_artifact(&log, dir) {
                warn!(run_id = %run_id, error = %e, "failed to write repair artifact");
            }
        }
        obs::emit_repair_finished(
            run_id,
            outcome.as_str(),
            log.attempts.len() as u32,
            stats.checks_performed(),
        );
        Ok(outcome.succeeded())
    }

    fn budget_spent(&self, stats: &mut RepairStats) -> bool {
        if !stats.budget_exhausted(self.build.max_checks()) {
            return false;
        }
        let max = self.build.max_checks().unwrap_or_default();
        obs::emit_budget_exhausted(stats.checks_performed(), max);
        stats.push_error(format!(
            "{BUILD_FIX_STEP}: check budget exhausted ({} of {max} checks used)",
            stats.checks_performed()
        ));
        true
    }

    async fn run_attempts(
        &self,
        scope: &[PathBuf],
        labels: &[String],
        stats: &mut RepairStats,
        log: &mut RepairLog,
    ) -> Result<RepairOutcome> {
        let mut attempt = 0u32;

        loop {
            if self.budget_spent(stats) {
                return Ok(RepairOutcome::BudgetExhausted);
            }
            let outcome = self.build.run(&self.crate_dir, stats).await?;
            if outcome.passed {
                return Ok(if attempt == 0 {
                    RepairOutcome::AlreadyPassing
                } else {
                    RepairOutcome::Fixed
                });
            }

            loop {
                attempt += 1;
                if attempt > self.options.max_retries {
                    stats.push_error(format!(
                        "{BUILD_FIX_STEP}: retries exhausted after {} attempts: {}",
                        self.options.max_retries,
                        outcome.first_line()
                    ));
                    return Ok(RepairOutcome::RetriesExhausted);
                }
                obs::emit_attempt_started(&log.run_id, attempt, self.options.max_retries);

                let checkpoint_before = self.checkpoint_working_tree(&format!(
                    "c2rs: wip before {BUILD_FIX_STEP} iter{attempt}"
                ));
                let request = self.fix_request(attempt, labels, &outcome);
                let invocation = self
                    .invoke_guarded(&request, checkpoint_before.as_ref())
                    .await?;

                let regression_rollbacks = match invocation {
                    Invocation::Completed {
                        regression_rollbacks,
                    } => regression_rollbacks,
                    Invocation::Regressed => {
                        log.record(record(attempt, AttemptOutcome::Regressed, 2, &outcome));
                        continue;
                    }
                    Invocation::Failed(_) => {
                        log.record(record(attempt, AttemptOutcome::OracleFailed, 0, &outcome));
                        continue;
                    }
                };

                if self.budget_spent(stats) {
                    // Unverifiable edits never survive.
                    self.rollback(checkpoint_before.as_ref())?;
                    log.record(record(
                        attempt,
                        AttemptOutcome::VerifyFailed,
                        regression_rollbacks,
                        &outcome,
                    ));
                    return Ok(RepairOutcome::BudgetExhausted);
                }
                let verify = self.build.run(&self.crate_dir, stats).await?;
                if verify.passed {
                    self.record_fix(attempt, scope)?;
                    log.record(record(
                        attempt,
                        AttemptOutcome::Fixed,
                        regression_rollbacks,
                        &outcome,
                    ));
                    return Ok(RepairOutcome::Fixed);
                }

                self.rollback(checkpoint_before.as_ref())?;
                log.record(record(
                    attempt,
                    AttemptOutcome::VerifyFailed,
                    regression_rollbacks,
                    &outcome,
                ));
                break;
            }
        }
    }

    fn fix_request(&self, attempt: u32, labels: &[String], outcome: &BuildOutcome) -> OracleRequest {
        let prompt = prompts::build_fix(
            &self.crate_dir,
            labels,
            &self.build_command,
            &outcome.diagnostic,
        );
        let prompt = prompts::with_additional_notes(prompt, &self.additional_notes);
        OracleRequest::new(format!("build-fix iter={attempt}"), prompt).with_options(&self.options)
    }

    fn record_fix(&self, attempt: u32, scope: &[PathBuf]) -> Result<()> {
        let committed = self
            .store
            .commit(&format!("c2rs: {BUILD_FIX_STEP} iter{attempt}"))?;
        if let (Some(progress), Some(checkpoint)) = (&self.progress, committed.as_ref()) {
            if let Err(e) =
                progress.save_fix_progress(BUILD_FIX_STEP, &format!("iter{attempt}"), scope, checkpoint)
            {
                warn!(error = %e, "failed to save fix progress");
            }
        }
        Ok(())
    }

    /// One check; on failure, repair; if that fails too, roll back to the
    /// last snapshot and record `"<step> failed: <first line>"`.
    pub async fn verify_and_repair(
        &self,
        step: &str,
        files: &[PathBuf],
        stats: &mut RepairStats,
    ) -> Result<bool> {
        let outcome = self.build.run(&self.crate_dir, stats).await?;
        if outcome.passed {
            return Ok(true);
        }
        if self.repair(files, stats).await? {
            return Ok(true);
        }

        let message = format!("{step} failed: {}", outcome.first_line());
        obs::emit_step_failed(step, outcome.first_line());
        stats.push_error(message);
        self.store.reset_to_last_snapshot()?;
        Ok(false)
    }

    /// Snapshot, let the agent perform `step`, verify (repairing if needed),
    /// then commit and record the step as completed.
    pub async fn apply_step(
        &self,
        step: &str,
        prompt: String,
        files: &[PathBuf],
        stats: &mut RepairStats,
    ) -> Result<bool> {
        let snapshot = self.store.snapshot();
        let prompt = prompts::with_additional_notes(prompt, &self.additional_notes);
        let request = OracleRequest::new(step, prompt).with_options(&self.options);

        match self.invoke_guarded(&request, snapshot.as_ref()).await? {
            Invocation::Completed { .. } => {}
            Invocation::Regressed => {
                stats.push_error(format!("{step} failed: agent removed tests twice"));
                obs::emit_step_failed(step, "agent removed tests twice");
                return Ok(false);
            }
            Invocation::Failed(message) => {
                obs::emit_step_failed(step, &message);
                stats.push_error(format!("{step} failed: {message}"));
                return Ok(false);
            }
        }

        // Failed fix attempts reset to this commit, not to the snapshot.
        self.checkpoint_working_tree(&format!("c2rs: {step}"));
        if !self.verify_and_repair(step, files, stats).await? {
            return Ok(false);
        }

        let committed = self.store.commit(&format!("c2rs: {step}"))?;
        if let Some(progress) = &self.progress {
            if let Err(e) = progress.save_step_progress(step, files, committed.as_ref()) {
                warn!(step, error = %e, "failed to save step progress");
            }
        }
        Ok(true)
    }
}

fn record(attempt: u32, outcome: AttemptOutcome, rollbacks: u32, build: &BuildOutcome) -> AttemptRecord {
    AttemptRecord {
        attempt,
        outcome,
        regression_rollbacks: rollbacks,
        diagnostic: build.first_line().to_string(),
    }
}
