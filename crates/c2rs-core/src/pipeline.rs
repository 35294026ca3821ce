//! Generation steps: one module at a time, each left building or undone.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::domain::{C2rsError, Checkpoint, RepairStats, Result};
use crate::progress::ProgressStore;
use crate::repair_loop::RepairLoop;

pub struct Pipeline {
    repair: Arc<RepairLoop>,
}

impl Pipeline {
    pub fn new(repair: Arc<RepairLoop>) -> Self {
        Self { repair }
    }

    pub fn repair_loop(&self) -> &Arc<RepairLoop> {
        &self.repair
    }

    /// Create `module` as an empty placeholder if needed, let the agent
    /// write it, then verify and repair. On failure the tree is back at the
    /// snapshot taken before the step.
    pub async fn generate_module(
        &self,
        step: &str,
        module: &Path,
        prompt: String,
        stats: &mut RepairStats,
    ) -> Result<bool> {
        let path = crate::workspace::ensure_placeholder(self.repair.crate_dir(), module)?;
        self.repair.apply_step(step, prompt, &[path], stats).await
    }

    /// Reset to the commit of the latest completed step, if any.
    pub fn resume(&self, progress: &ProgressStore, step_order: &[&str]) -> Result<Option<Checkpoint>> {
        let Some(commit) = progress.resume_checkpoint(step_order) else {
            return Ok(None);
        };
        let checkpoint = Checkpoint::new(commit);
        if !self.repair.store().reset_to(&checkpoint) {
            return Err(C2rsError::RollbackFailed {
                checkpoint: checkpoint.id,
            });
        }
        info!(checkpoint = %checkpoint.short(), "resumed from completed step");
        Ok(Some(checkpoint))
    }
}
