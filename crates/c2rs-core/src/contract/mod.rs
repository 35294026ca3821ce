//! Library replacement contract: ask the oracle whether a C call subtree
//! can be replaced by an existing Rust crate, and plan replacements over the
//! whole call graph.

pub mod evaluator;
pub mod planner;
pub mod subtree;
pub mod tagged_block;
pub mod tolerant_json;

pub use evaluator::{
    normalize_verdict, parse_summary, ContractEvaluator, Denylist, Evaluation, MAX_LLM_RETRIES,
};
pub use planner::{apply, write_mappings, LibraryPlanner, ReplacementMapping, ReplacementPlan};
pub use subtree::{SourceSnippet, SubtreeDescription};
pub use tagged_block::{block_or_whole, extract_tagged_block};
pub use tolerant_json::TolerantJsonError;
