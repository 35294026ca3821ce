//! The upstream symbol table (`symbols.jsonl`) and its function call graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

use tracing::{debug, warn};

use crate::domain::{FunctionId, FunctionRecord, LibraryReplacementVerdict, Result};

/// Symbol records plus the caller -> callee graph between functions.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    records: Vec<FunctionRecord>,
    index: HashMap<FunctionId, usize>,
    callees: BTreeMap<FunctionId, Vec<FunctionId>>,
}

impl SymbolTable {
    /// Read one JSON record per line. Blank and malformed lines are skipped.
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<FunctionRecord>(line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "skipped malformed symbol records");
        }
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<FunctionRecord>) -> Self {
        let mut index = HashMap::new();
        let mut by_name: HashMap<&str, Vec<FunctionId>> = HashMap::new();
        for (pos, record) in records.iter().enumerate() {
            index.insert(record.id, pos);
            if record.is_function() {
                for name in [record.name.as_str(), record.qualified_name.as_str()] {
                    if !name.is_empty() {
                        let ids = by_name.entry(name).or_default();
                        if !ids.contains(&record.id) {
                            ids.push(record.id);
                        }
                    }
                }
            }
        }

        let mut callees = BTreeMap::new();
        for record in records.iter().filter(|r| r.is_function()) {
            let mut targets: Vec<FunctionId> = Vec::new();
            for name in &record.refs {
                for &target in by_name.get(name.as_str()).map(Vec::as_slice).unwrap_or_default() {
                    if target != record.id && !targets.contains(&target) {
                        targets.push(target);
                    }
                }
            }
            callees.insert(record.id, targets);
        }

        debug!(records = records.len(), functions = callees.len(), "symbol table built");
        Self {
            records,
            index,
            callees,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FunctionRecord] {
        &self.records
    }

    pub fn get(&self, id: FunctionId) -> Option<&FunctionRecord> {
        self.index.get(&id).map(|&pos| &self.records[pos])
    }

    /// Function ids in table order.
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.records
            .iter()
            .filter(|r| r.is_function())
            .map(|r| r.id)
            .collect()
    }

    pub fn callees(&self, id: FunctionId) -> &[FunctionId] {
        self.callees.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Functions whose name or qualified name is `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<FunctionId> {
        self.records
            .iter()
            .filter(|r| r.is_function() && (r.name == name || r.qualified_name == name))
            .map(|r| r.id)
            .collect()
    }

    /// Every function reachable from `root`, `root` included.
    pub fn descendants(&self, root: FunctionId) -> BTreeSet<FunctionId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.callees(id).iter().filter(|c| !seen.contains(c)));
            }
        }
        seen
    }

    /// Functions no other function calls, in id order.
    pub fn root_ids(&self) -> Vec<FunctionId> {
        let called: BTreeSet<FunctionId> = self.callees.values().flatten().copied().collect();
        self.callees
            .keys()
            .filter(|id| !called.contains(id))
            .copied()
            .collect()
    }

    /// Breadth-first order from `roots`, then every function not reached.
    pub fn bfs_order(&self, roots: &[FunctionId]) -> Vec<FunctionId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<FunctionId> = roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            queue.extend(self.callees(id).iter().filter(|c| !seen.contains(c)));
        }
        order.extend(self.callees.keys().filter(|id| !seen.contains(id)));
        order
    }

    /// Attach `verdict` to `id` and point its refs at the chosen libraries.
    pub fn mark_replaced(&mut self, id: FunctionId, verdict: LibraryReplacementVerdict) -> bool {
        let Some(&pos) = self.index.get(&id) else {
            return false;
        };
        let record = &mut self.records[pos];
        record.refs = verdict.library_markers();
        record.attach_lib_replacement(verdict);
        true
    }

    /// Drop the given functions from the table. Non-function symbols stay.
    pub fn remove_functions(&mut self, ids: &BTreeSet<FunctionId>) {
        let records = std::mem::take(&mut self.records);
        *self = Self::from_records(
            records
                .into_iter()
                .filter(|r| !(r.is_function() && ids.contains(&r.id)))
                .collect(),
        );
    }

    /// Write one JSON record per line, replacing `path` atomically.
    pub fn write_jsonl(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("jsonl.{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, out)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
