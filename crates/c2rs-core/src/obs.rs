//! Structured observability hooks for c2rs lifecycle events.
//!
//! Each `repair` call runs inside a `c2rs.run` span carrying its `run_id`
//! (see `RepairLoop::repair`). Events carry an `event = "<area>.<name>"` field
//! so they can be filtered from JSON logs (`--json`).

use tracing::{info, warn};

pub fn emit_repair_started(run_id: &str, scope_files: usize, checks_performed: u64) {
    info!(
        event = "repair.started",
        run_id = %run_id,
        scope_files = scope_files,
        checks_performed = checks_performed,
    );
}

pub fn emit_attempt_started(run_id: &str, attempt: u32, max_retries: u32) {
    info!(
        event = "repair.attempt_started",
        run_id = %run_id,
        attempt = attempt,
        max_retries = max_retries,
    );
}

/// Emit event: repair loop finished with its outcome and budget usage.
pub fn emit_repair_finished(run_id: &str, outcome: &str, attempts: u32, checks_performed: u64) {
    info!(
        event = "repair.finished",
        run_id = %run_id,
        outcome = %outcome,
        attempts = attempts,
        checks_performed = checks_performed,
    );
}

pub fn emit_budget_exhausted(checks_performed: u64, max_checks: u64) {
    warn!(
        event = "repair.budget_exhausted",
        checks_performed = checks_performed,
        max_checks = max_checks,
    );
}

/// Emit event: a pipeline step failed and was rolled back to the snapshot.
pub fn emit_step_failed(step: &str, reason: &str) {
    warn!(event = "repair.step_failed", step = %step, reason = %reason);
}

/// Emit event: the regression guard reverted an invocation.
pub fn emit_guard_rollback(agent: &str, checkpoint: &str, reason: &str) {
    warn!(
        event = "guard.rollback",
        agent = %agent,
        checkpoint = %checkpoint,
        reason = %reason,
    );
}

pub fn emit_contract_evaluated(root: &str, replaceable: bool, confidence: f64, attempts: u32) {
    info!(
        event = "contract.evaluated",
        root = %root,
        replaceable = replaceable,
        confidence = confidence,
        attempts = attempts,
    );
}

pub fn emit_contract_parse_failed(root: &str, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "contract.parse_failed",
        root = %root,
        attempt = attempt,
        error = %error,
    );
}

pub fn emit_plan_finished(evaluated: usize, selected: usize, pruned: usize) {
    info!(
        event = "contract.plan_finished",
        evaluated = evaluated,
        selected = selected,
        pruned = pruned,
    );
}

pub fn emit_verify_iteration(iteration: u32, max_iterations: u32, aligned: bool) {
    info!(
        event = "verify.iteration",
        iteration = iteration,
        max_iterations = max_iterations,
        aligned = aligned,
    );
}
