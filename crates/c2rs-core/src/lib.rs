//! c2rs core: the control loops that keep an LLM-driven C to Rust migration
//! honest.
//!
//! - [`RepairLoop`]: bounded build-fix cycles with rollback to a known-good
//!   checkpoint
//! - [`RegressionGuard`]: undoes agent edits that delete tests
//! - [`ContractEvaluator`] / [`LibraryPlanner`]: replace C subtrees with
//!   existing Rust crates instead of generating code for them
//! - [`VerificationLoop`]: analyze / optimize until the crate matches the C
//!   behaviour

pub mod audit;
pub mod build_runner;
pub mod checkpoint_store;
pub mod config;
pub mod contract;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod oracle;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod regression_guard;
pub mod repair_loop;
pub mod symbols;
pub mod telemetry;
pub mod verification;
pub mod workspace;

pub use domain::{
    AlignmentResult, C2rsError, Checkpoint, FunctionId, FunctionRecord, LibraryReplacementVerdict,
    Parameter, PhaseState, RepairOptions, RepairStats, Result, RunState,
};

pub use audit::{
    read_repair_artifact, write_repair_artifact, AttemptOutcome, AttemptRecord, RepairLog,
    RepairOutcome,
};
pub use build_runner::{BuildExecutor, BuildOutcome, BuildRunner, ShellBuildExecutor};
pub use checkpoint_store::{CheckpointStore, GitCheckpointStore};
pub use config::{ProjectConfig, ProjectLayout};
pub use contract::{
    ContractEvaluator, Denylist, Evaluation, LibraryPlanner, ReplacementMapping, ReplacementPlan,
    SubtreeDescription, MAX_LLM_RETRIES,
};
pub use oracle::{
    AgentId, CommandOracle, NoopObserver, Oracle, OracleRequest, ToolCallEvent, ToolCallObserver,
};
pub use pipeline::Pipeline;
pub use progress::{ProgressFile, ProgressStore};
pub use regression_guard::{
    DeletionArbiter, DeletionFinding, DeletionHeuristic, FileChange, OracleArbiter,
    RegressionGuard, TestMarkerHeuristic,
};
pub use repair_loop::{Invocation, RepairLoop};
pub use symbols::SymbolTable;
pub use verification::{AlignmentSteps, OracleAlignmentSteps, VerificationLoop, VerificationReport};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// c2rs version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
