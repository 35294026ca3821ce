//! Library replacement verdicts produced by the contract evaluator.

use serde::{Deserialize, Serialize};

/// Canonical answer to "can this call subtree be replaced by a library?".
///
/// Always produced through normalization of the oracle's loosely shaped
/// answer; the raw shape never leaves the parsing boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryReplacementVerdict {
    pub replaceable: bool,

    /// Primary library, empty when none was named.
    #[serde(default)]
    pub library: String,

    #[serde(default)]
    pub libraries: Vec<String>,

    /// Representative API, empty when none was named.
    #[serde(default)]
    pub api: String,

    #[serde(default)]
    pub apis: Vec<String>,

    /// Always within `[0.0, 1.0]`.
    #[serde(default)]
    pub confidence: f64,

    #[serde(default)]
    pub notes: String,
}

impl LibraryReplacementVerdict {
    /// Conservative default used when the oracle cannot be understood.
    pub fn not_replaceable() -> Self {
        Self {
            replaceable: false,
            library: String::new(),
            libraries: Vec::new(),
            api: String::new(),
            apis: Vec::new(),
            confidence: 0.0,
            notes: String::new(),
        }
    }

    /// First named library, or the singular `library` field.
    pub fn primary_library(&self) -> Option<&str> {
        self.libraries
            .first()
            .map(String::as_str)
            .or_else(|| (!self.library.is_empty()).then_some(self.library.as_str()))
    }

    /// `lib::<name>` markers written into the symbol table's `ref` list.
    pub fn library_markers(&self) -> Vec<String> {
        if !self.libraries.is_empty() {
            self.libraries.iter().map(|l| format!("lib::{l}")).collect()
        } else if !self.library.is_empty() {
            vec![format!("lib::{}", self.library)]
        } else {
            Vec::new()
        }
    }
}

impl Default for LibraryReplacementVerdict {
    fn default() -> Self {
        Self::not_replaceable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_not_replaceable() {
        let v = LibraryReplacementVerdict::default();
        assert!(!v.replaceable);
        assert_eq!(v.confidence, 0.0);
        assert!(v.primary_library().is_none());
        assert!(v.library_markers().is_empty());
    }

    #[test]
    fn test_markers_prefer_library_list() {
        let v = LibraryReplacementVerdict {
            replaceable: true,
            library: "flate2".to_string(),
            libraries: vec!["flate2".to_string(), "crc32fast".to_string()],
            ..Default::default()
        };
        assert_eq!(v.primary_library(), Some("flate2"));
        assert_eq!(v.library_markers(), vec!["lib::flate2", "lib::crc32fast"]);

        let single = LibraryReplacementVerdict {
            library: "regex".to_string(),
            ..Default::default()
        };
        assert_eq!(single.library_markers(), vec!["lib::regex"]);
    }
}
