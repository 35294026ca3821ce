//! Bounded analyze / optimize loop checking that the generated crate
//! behaves like the C sources it replaces.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::contract::parse_summary;
use crate::domain::{AlignmentResult, C2rsError, RepairStats, Result, RunState};
use crate::obs;
use crate::oracle::{NoopObserver, OracleRequest};
use crate::prompts;
use crate::repair_loop::RepairLoop;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
const ALIGNMENT_FIX_STEP: &str = "alignment_fix";

/// The two halves of one verification iteration.
#[async_trait]
pub trait AlignmentSteps: Send + Sync {
    /// Compare the crate against the C sources. Recoverable problems are
    /// reported through the returned result, not as errors.
    async fn analyze(&self) -> Result<AlignmentResult>;

    /// Close the gaps listed in `report` without leaving the crate broken.
    async fn optimize(&self, report: &str, stats: &mut RepairStats) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub aligned: bool,
    /// Optimization cycles performed.
    pub iterations: u32,
    /// Latest analysis.
    pub result: AlignmentResult,
}

pub struct VerificationLoop {
    steps: Arc<dyn AlignmentSteps>,
    max_iterations: u32,
}

impl VerificationLoop {
    pub fn new(steps: Arc<dyn AlignmentSteps>) -> Self {
        Self {
            steps,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Refuses to start unless both upstream phases completed. Performs at
    /// most `max_iterations` optimize-then-reanalyze cycles.
    pub async fn run(&self, state: &RunState, stats: &mut RepairStats) -> Result<VerificationReport> {
        if !state.is_ready() {
            return Err(C2rsError::PrerequisiteIncomplete(
                state.missing_phases().join(", "),
            ));
        }

        let mut result = self.steps.analyze().await?;
        let mut iteration = 0u32;
        let mut cycles = 0u32;
        while iteration < self.max_iterations {
            if result.is_aligned {
                break;
            }
            iteration += 1;
            if iteration >= self.max_iterations {
                warn!(max_iterations = self.max_iterations, "verification iteration limit reached");
                break;
            }
            self.steps.optimize(&result.report, stats).await?;
            cycles += 1;
            result = self.steps.analyze().await?;
            obs::emit_verify_iteration(iteration, self.max_iterations, result.is_aligned);
        }

        info!(aligned = result.is_aligned, cycles, summary = %result.summary, "verification finished");
        Ok(VerificationReport {
            aligned: result.is_aligned,
            iterations: cycles,
            result,
        })
    }
}

/// Alignment steps driven by the coding agent.
///
/// Analysis is a read-only invocation whose answer carries a `<SUMMARY>`
/// block; optimization is a guarded step that must leave the build green.
pub struct OracleAlignmentSteps {
    repair: Arc<RepairLoop>,
    source_root: PathBuf,
}

impl OracleAlignmentSteps {
    pub fn new(repair: Arc<RepairLoop>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            repair,
            source_root: source_root.into(),
        }
    }

    fn interpret(&self, answer: &str) -> AlignmentResult {
        let obj = match parse_summary(answer) {
            Ok(obj) => obj,
            Err(e) => {
                warn!(error = %e, "alignment answer not understood");
                return AlignmentResult {
                    is_aligned: false,
                    summary: format!("alignment answer not understood: {e}"),
                    report: String::new(),
                };
            }
        };

        let is_aligned = obj.get("is_aligned") == Some(&Value::Bool(true));
        let summary = obj
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let report_path = obj
            .get("report_path")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(prompts::ALIGNMENT_REPORT_FILE);
        let report = std::fs::read_to_string(self.repair.crate_dir().join(report_path.trim()))
            .ok()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| summary.clone());

        AlignmentResult {
            is_aligned,
            summary,
            report,
        }
    }
}

#[async_trait]
impl AlignmentSteps for OracleAlignmentSteps {
    async fn analyze(&self) -> Result<AlignmentResult> {
        let prompt = prompts::with_additional_notes(
            prompts::alignment_analysis(self.repair.crate_dir(), &self.source_root),
            self.repair.additional_notes(),
        );
        let request = OracleRequest::new("alignment-analysis", prompt).with_options(self.repair.options());
        match self.repair.oracle().invoke(&request, &NoopObserver).await {
            Ok(answer) => Ok(self.interpret(&answer)),
            Err(C2rsError::Oracle(message)) => Ok(AlignmentResult::failed(message)),
            Err(e) => Err(e),
        }
    }

    async fn optimize(&self, report: &str, stats: &mut RepairStats) -> Result<()> {
        let prompt = prompts::alignment_optimization(report);
        if !self.repair.apply_step(ALIGNMENT_FIX_STEP, prompt, &[], stats).await? {
            warn!(step = ALIGNMENT_FIX_STEP, "optimization step did not complete");
        }
        Ok(())
    }
}
