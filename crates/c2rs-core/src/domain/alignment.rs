//! Alignment verdicts and the persisted run-state gate.

use serde::{Deserialize, Serialize};

/// Outcome of one alignment analysis. Only the latest one is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub is_aligned: bool,
    pub summary: String,
    pub report: String,
}

impl AlignmentResult {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            is_aligned: false,
            summary: format!("analysis failed: {reason}"),
            report: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    #[serde(default)]
    pub completed: bool,
}

/// `run_state.json`, written by upstream phases and only read here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub transpile: PhaseState,

    #[serde(default)]
    pub optimize: PhaseState,
}

impl RunState {
    pub fn is_ready(&self) -> bool {
        self.transpile.completed && self.optimize.completed
    }

    /// Names of phases that still have to complete.
    pub fn missing_phases(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.transpile.completed {
            missing.push("transpile");
        }
        if !self.optimize.completed {
            missing.push("optimize");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_read_as_incomplete() {
        let state: RunState = serde_json::from_str(r#"{"transpile": {"completed": true}}"#).unwrap();
        assert!(!state.is_ready());
        assert_eq!(state.missing_phases(), vec!["optimize"]);

        let state: RunState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.missing_phases(), vec!["transpile", "optimize"]);
    }

    #[test]
    fn test_ready_when_both_complete() {
        let state: RunState = serde_json::from_str(
            r#"{"transpile": {"completed": true}, "optimize": {"completed": true}}"#,
        )
        .unwrap();
        assert!(state.is_ready());
        assert!(state.missing_phases().is_empty());
    }
}
