//! Parent-first library replacement planning over the call graph.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::evaluator::ContractEvaluator;
use super::subtree::SubtreeDescription;
use crate::domain::{FunctionId, FunctionRecord, LibraryReplacementVerdict, Result};
use crate::obs;
use crate::symbols::SymbolTable;

/// Outcome of one planning pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplacementPlan {
    /// Subtree roots to replace, in evaluation order.
    pub selected: Vec<(FunctionId, LibraryReplacementVerdict)>,
    /// Functions covered by a selected root, never evaluated on their own.
    pub pruned: BTreeSet<FunctionId>,
    /// Oracle evaluations performed.
    pub evaluated: usize,
}

impl ReplacementPlan {
    pub fn is_selected(&self, id: FunctionId) -> bool {
        self.selected.iter().any(|(sel, _)| *sel == id)
    }
}

/// One line of `library_replacements.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementMapping {
    pub id: FunctionId,
    pub name: String,
    pub qualified_name: String,
    pub library: String,
    pub libraries: Vec<String>,
    pub api: String,
    pub apis: Vec<String>,
    pub confidence: f64,
    pub notes: String,
}

impl ReplacementMapping {
    fn new(record: &FunctionRecord, verdict: &LibraryReplacementVerdict) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            qualified_name: record.qualified_name.clone(),
            library: verdict.primary_library().unwrap_or_default().to_string(),
            libraries: verdict.libraries.clone(),
            api: verdict.api.clone(),
            apis: verdict.apis.clone(),
            confidence: verdict.confidence,
            notes: verdict.notes.clone(),
        }
    }
}

pub struct LibraryPlanner {
    evaluator: ContractEvaluator,
    entry_names: Vec<String>,
    max_functions: Option<usize>,
    source_root: Option<PathBuf>,
}

impl LibraryPlanner {
    pub fn new(evaluator: ContractEvaluator) -> Self {
        Self {
            evaluator,
            entry_names: vec!["main".to_string()],
            max_functions: None,
            source_root: None,
        }
    }

    pub fn with_entry_names(mut self, names: Vec<String>) -> Self {
        self.entry_names = names;
        self
    }

    /// Cap on oracle evaluations for one pass.
    pub fn with_max_functions(mut self, max: usize) -> Self {
        self.max_functions = Some(max);
        self
    }

    /// Directory the records' `file` paths are relative to.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    /// Entry points are never replaced, only descended into.
    pub fn is_entry_function(&self, record: &FunctionRecord) -> bool {
        self.entry_names.iter().any(|entry| {
            record.name == *entry
                || record.qualified_name == *entry
                || record.qualified_name.ends_with(&format!("::{entry}"))
        })
    }

    /// Evaluate subtrees parent-first, starting from `candidates` (symbol
    /// names) or, when empty, from the functions nothing calls.
    ///
    /// A replaceable verdict prunes the whole subtree below it; anything
    /// else descends into the callees. Only environment faults are errors.
    pub async fn plan(&self, table: &SymbolTable, candidates: &[String]) -> Result<ReplacementPlan> {
        let mut start: Vec<FunctionId> = Vec::new();
        for name in candidates {
            let found = table.find_by_name(name);
            if found.is_empty() {
                warn!(candidate = %name, "candidate root not found in symbol table");
            }
            start.extend(found);
        }
        if candidates.is_empty() {
            start = table.root_ids();
            if start.is_empty() {
                // every function sits on a cycle
                start = table.function_ids();
            }
        }

        let mut plan = ReplacementPlan::default();
        let mut visited = BTreeSet::new();
        let mut stack: Vec<FunctionId> = start.into_iter().rev().collect();

        while let Some(id) = stack.pop() {
            if plan.pruned.contains(&id) || !visited.insert(id) {
                continue;
            }
            let Some(record) = table.get(id) else { continue };

            if self.is_entry_function(record) {
                debug!(function = %record.label(), "entry function, descending");
                stack.extend(table.callees(id).iter().rev());
                continue;
            }
            if self.max_functions.is_some_and(|max| plan.evaluated >= max) {
                warn!(evaluated = plan.evaluated, "evaluation cap reached, stopping plan");
                break;
            }

            let label = record.label();
            let description = SubtreeDescription::build(table, id, self.source_root.as_deref())
                .map(|d| d.render())
                .unwrap_or_default();
            let evaluation = self.evaluator.evaluate(&label, &description).await?;
            plan.evaluated += 1;

            if evaluation.verdict.replaceable {
                let mut covered = table.descendants(id);
                covered.remove(&id);
                plan.pruned.extend(covered);
                plan.selected.push((id, evaluation.verdict));
            } else {
                stack.extend(table.callees(id).iter().rev());
            }
        }

        // a root selected early may sit inside a subtree selected later
        let pruned = &plan.pruned;
        plan.selected.retain(|(id, _)| !pruned.contains(id));

        obs::emit_plan_finished(plan.evaluated, plan.selected.len(), plan.pruned.len());
        Ok(plan)
    }
}

/// Attach verdicts to the selected roots and drop the pruned functions.
pub fn apply(plan: &ReplacementPlan, table: &mut SymbolTable) -> Vec<ReplacementMapping> {
    let mut mappings = Vec::with_capacity(plan.selected.len());
    for (id, verdict) in &plan.selected {
        if let Some(record) = table.get(*id) {
            mappings.push(ReplacementMapping::new(record, verdict));
        }
        table.mark_replaced(*id, verdict.clone());
    }
    let removable: BTreeSet<FunctionId> = plan
        .pruned
        .iter()
        .filter(|id| !plan.is_selected(**id))
        .copied()
        .collect();
    table.remove_functions(&removable);
    mappings
}

pub fn write_mappings(path: &Path, mappings: &[ReplacementMapping]) -> Result<()> {
    let mut out = String::new();
    for mapping in mappings {
        out.push_str(&serde_json::to_string(mapping)?);
        out.push('\n');
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, out)?;
    Ok(())
}
