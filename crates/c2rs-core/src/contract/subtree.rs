//! Structural description of a call subtree, as shown to the oracle.

use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;

use crate::domain::{FunctionId, FunctionRecord};
use crate::symbols::SymbolTable;

const MAX_LISTED_EDGES: usize = 400;
const MAX_DOT_EDGES: usize = 200;
const MAX_SNIPPET_LINES: usize = 120;
const SNIPPET_CHILDREN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnippet {
    pub label: String,
    pub signature: String,
    pub source: String,
}

/// Root, members, edges and a few source samples of one subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeDescription {
    pub root: FunctionId,
    pub root_label: String,
    pub root_signature: String,
    /// `(label, signature)` in breadth-first order from the root.
    pub members: Vec<(String, String)>,
    /// Caller to callee, both as labels.
    pub edges: Vec<(String, String)>,
    pub snippets: Vec<SourceSnippet>,
}

impl SubtreeDescription {
    /// Describe the subtree under `root`; `None` when `root` is unknown.
    ///
    /// Snippets are read from `source_root.join(record.file)` using the
    /// record's line range and skipped when the source cannot be read.
    pub fn build(table: &SymbolTable, root: FunctionId, source_root: Option<&Path>) -> Option<Self> {
        let root_record = table.get(root)?;
        let reachable = table.descendants(root);
        let order: Vec<FunctionId> = table
            .bfs_order(&[root])
            .into_iter()
            .filter(|id| reachable.contains(id))
            .collect();

        let mut members = Vec::with_capacity(order.len());
        let mut edges = Vec::new();
        for &id in &order {
            let Some(record) = table.get(id) else { continue };
            members.push((record.label(), record.signature.clone()));
            for &callee in table.callees(id) {
                if let Some(target) = table.get(callee) {
                    edges.push((record.label(), target.label()));
                }
            }
        }

        let mut snippets = Vec::new();
        if let Some(source_root) = source_root {
            let sampled = std::iter::once(root)
                .chain(table.callees(root).iter().copied().take(SNIPPET_CHILDREN));
            for id in sampled {
                if let Some(snippet) = table.get(id).and_then(|r| read_snippet(r, source_root)) {
                    snippets.push(snippet);
                }
            }
        }

        debug!(
            root,
            members = members.len(),
            edges = edges.len(),
            snippets = snippets.len(),
            "subtree described"
        );
        Some(Self {
            root,
            root_label: root_record.label(),
            root_signature: root_record.signature.clone(),
            members,
            edges,
            snippets,
        })
    }

    /// Text form embedded in the library evaluation prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Root function: {} (id {})", self.root_label, self.root);
        if !self.root_signature.is_empty() {
            let _ = writeln!(out, "Signature: {}", self.root_signature);
        }

        let _ = writeln!(out, "\nFunctions in subtree ({}):", self.members.len());
        for (label, signature) in &self.members {
            let _ = writeln!(out, "- {label} | {signature}");
        }

        let _ = writeln!(out, "\nCall edges ({}):", self.edges.len());
        for (caller, callee) in self.edges.iter().take(MAX_LISTED_EDGES) {
            let _ = writeln!(out, "{caller} -> {callee}");
        }
        if self.edges.len() > MAX_LISTED_EDGES {
            let _ = writeln!(out, "...({} more edges)", self.edges.len() - MAX_LISTED_EDGES);
        }

        if !self.edges.is_empty() && self.edges.len() <= MAX_DOT_EDGES {
            let _ = writeln!(out, "\nDOT:\n{}", self.dot());
        }

        if !self.snippets.is_empty() {
            let _ = writeln!(out, "\nSource samples:");
            for snippet in &self.snippets {
                let _ = writeln!(out, "--- BEGIN {} ---", snippet.label);
                if !snippet.signature.is_empty() {
                    let _ = writeln!(out, "{}", snippet.signature);
                }
                let _ = writeln!(out, "{}", snippet.source.trim_end());
                let _ = writeln!(out, "--- END {} ---", snippet.label);
            }
        }
        out
    }

    pub fn dot(&self) -> String {
        let mut out = String::from("digraph subtree { rankdir=LR; ");
        for (caller, callee) in &self.edges {
            let _ = write!(out, "\"{}\" -> \"{}\"; ", dot_escape(caller), dot_escape(callee));
        }
        out.push('}');
        out
    }
}

fn dot_escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn read_snippet(record: &FunctionRecord, source_root: &Path) -> Option<SourceSnippet> {
    if record.file.is_empty() {
        return None;
    }
    let text = std::fs::read_to_string(source_root.join(&record.file)).ok()?;
    let start = record.start_line.unwrap_or(1).max(1) as usize;
    let end = record.end_line.map(|e| e as usize).unwrap_or(usize::MAX);
    let lines: Vec<&str> = text
        .lines()
        .skip(start - 1)
        .take(end.saturating_sub(start) + 1)
        .take(MAX_SNIPPET_LINES)
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(SourceSnippet {
        label: record.label(),
        signature: record.signature.clone(),
        source: lines.join("\n"),
    })
}
