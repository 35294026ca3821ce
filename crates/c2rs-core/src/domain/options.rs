//! Repair session configuration and run-wide counters.

use serde::{Deserialize, Serialize};

/// Configuration for one repair session. Built once per pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairOptions {
    /// Fix attempts per `RepairLoop::repair` call.
    pub max_retries: u32,

    /// Global cap on build/test invocations across the whole run.
    /// `None` means unlimited.
    pub max_checks: Option<u64>,

    /// Build timeout in seconds; 0 disables the timeout.
    pub build_timeout_secs: u64,

    pub non_interactive: bool,

    pub model_group: Option<String>,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_checks: None,
            build_timeout_secs: 0,
            non_interactive: true,
            model_group: None,
        }
    }
}

/// Run-wide counters shared by every repair loop in one run.
///
/// Passed explicitly as `&mut RepairStats`. `checks_performed` only grows and
/// `errors` is append-only; the private fields keep it that way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairStats {
    checks_performed: u64,
    errors: Vec<String>,
}

impl RepairStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checks_performed(&self) -> u64 {
        self.checks_performed
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Count one build invocation. Returns the new total.
    pub fn record_check(&mut self) -> u64 {
        self.checks_performed += 1;
        self.checks_performed
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Whether the global check budget is spent.
    pub fn budget_exhausted(&self, max_checks: Option<u64>) -> bool {
        matches!(max_checks, Some(max) if self.checks_performed >= max)
    }

    /// A run that recorded any error finished degraded.
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = RepairOptions::default();
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.max_checks, None);
        assert_eq!(opts.build_timeout_secs, 0);
        assert!(opts.non_interactive);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let opts: RepairOptions = serde_json::from_str(r#"{"max_checks": 10}"#).unwrap();
        assert_eq!(opts.max_checks, Some(10));
        assert_eq!(opts.max_retries, 3);
    }

    #[test]
    fn test_budget_exhaustion() {
        let mut stats = RepairStats::new();
        assert!(!stats.budget_exhausted(None));
        assert!(stats.budget_exhausted(Some(0)));

        stats.record_check();
        stats.record_check();
        assert!(!stats.budget_exhausted(Some(3)));
        stats.record_check();
        assert!(stats.budget_exhausted(Some(3)));
        assert!(!stats.budget_exhausted(None));
    }

    #[test]
    fn test_errors_mark_degraded() {
        let mut stats = RepairStats::new();
        assert!(!stats.is_degraded());
        stats.push_error("build_fix failed: error[E0425]");
        assert!(stats.is_degraded());
        assert_eq!(stats.errors().len(), 1);
    }
}
