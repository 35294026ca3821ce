//! Domain-level error taxonomy for c2rs.
//!
//! Only environment faults and persistence failures surface as errors.
//! Recoverable conditions (budget exhaustion, malformed oracle output,
//! failing builds, detected test deletions) are reported through return
//! values and [`crate::RepairStats`].

/// c2rs domain errors.
#[derive(Debug, thiserror::Error)]
pub enum C2rsError {
    #[error("git error: {0}")]
    Git(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("oracle invocation failed: {0}")]
    Oracle(String),

    #[error("prerequisite phase incomplete: {0}")]
    PrerequisiteIncomplete(String),

    #[error("rollback to checkpoint {checkpoint} failed")]
    RollbackFailed { checkpoint: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for c2rs domain operations.
pub type Result<T> = std::result::Result<T, C2rsError>;
