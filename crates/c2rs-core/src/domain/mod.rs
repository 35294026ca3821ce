//! Domain models for c2rs.
//!
//! - `FunctionRecord`: one C function from the upstream symbol table
//! - `LibraryReplacementVerdict`: normalized library-replacement answer
//! - `RepairOptions` / `RepairStats`: session config and run-wide counters
//! - `Checkpoint`: rollback target
//! - `AlignmentResult` / `RunState`: verification verdict and its gate

pub mod alignment;
pub mod checkpoint;
pub mod error;
pub mod function;
pub mod options;
pub mod verdict;

pub use alignment::{AlignmentResult, PhaseState, RunState};
pub use checkpoint::Checkpoint;
pub use error::{C2rsError, Result};
pub use function::{FunctionId, FunctionRecord, Parameter, FUNCTION_CATEGORY};
pub use options::{RepairOptions, RepairStats};
pub use verdict::LibraryReplacementVerdict;
