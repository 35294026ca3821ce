//! Function records read from the upstream symbol table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::verdict::LibraryReplacementVerdict;

/// Stable identifier of a symbol in `symbols.jsonl`.
pub type FunctionId = u64;

/// Category tag used by the analyzer for function symbols.
pub const FUNCTION_CATEGORY: &str = "function";

/// One formal parameter of a C function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub ty: String,
}

/// One C symbol under migration.
///
/// Everything except `lib_replacement` is owned by the upstream analyzer and
/// is never rewritten here. Unknown fields are carried through `extra` so a
/// rewritten symbol table loses nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: FunctionId,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub qualified_name: String,

    /// Defining source file.
    #[serde(default)]
    pub file: String,

    #[serde(default)]
    pub signature: String,

    #[serde(default)]
    pub params: Vec<Parameter>,

    /// `"function"` or `"type"`.
    #[serde(default)]
    pub category: String,

    /// Names of referenced symbols (callees for functions).
    #[serde(rename = "ref", default)]
    pub refs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    lib_replacement: Option<LibraryReplacementVerdict>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FunctionRecord {
    pub fn new(id: FunctionId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            qualified_name: name.clone(),
            name,
            file: String::new(),
            signature: String::new(),
            params: Vec::new(),
            category: FUNCTION_CATEGORY.to_string(),
            refs: Vec::new(),
            start_line: None,
            end_line: None,
            lib_replacement: None,
            extra: Map::new(),
        }
    }

    pub fn is_function(&self) -> bool {
        self.category == FUNCTION_CATEGORY
    }

    /// Qualified name, falling back to the plain name, then to `sym_<id>`.
    pub fn label(&self) -> String {
        if !self.qualified_name.is_empty() {
            self.qualified_name.clone()
        } else if !self.name.is_empty() {
            self.name.clone()
        } else {
            format!("sym_{}", self.id)
        }
    }

    pub fn lib_replacement(&self) -> Option<&LibraryReplacementVerdict> {
        self.lib_replacement.as_ref()
    }

    /// Attach a verdict. A re-evaluation replaces the whole verdict object;
    /// an attached verdict is never edited in place.
    pub fn attach_lib_replacement(&mut self, verdict: LibraryReplacementVerdict) {
        self.lib_replacement = Some(verdict);
    }
}
