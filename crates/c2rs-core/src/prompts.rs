//! Prompt builders for every oracle request the core issues.
//!
//! Wording is deliberately plain; the machine-readable parts (tagged blocks,
//! JSON keys, YES/NO markers) are what the parsers depend on.

use std::path::Path;

pub const SUMMARY_TAG: &str = "SUMMARY";
pub const BUILD_ERROR_TAG: &str = "BUILD_ERROR";
pub const YES_MARKER: &str = "<!!!YES!!!>";
pub const NO_MARKER: &str = "<!!!NO!!!>";
pub const ALIGNMENT_REPORT_FILE: &str = "alignment_report.md";

const NOTES_HEADER: &str = "Additional notes:";

/// Minimal build-fix request scoped to `scope` files.
pub fn build_fix(crate_dir: &Path, scope: &[String], build_cmd: &str, diagnostic: &str) -> String {
    let mut lines = vec![
        format!("Make the smallest change that gets `{build_cmd}` passing."),
        format!("- crate root: {}", crate_dir.display()),
        String::new(),
        "Only modify these files unless a change elsewhere is strictly necessary:".to_string(),
    ];
    if scope.is_empty() {
        lines.push("- (any file in the crate)".to_string());
    } else {
        lines.extend(scope.iter().map(|f| format!("- {f}")));
    }
    lines.extend([
        String::new(),
        "Constraints:".to_string(),
        "- fix compile errors first, then failing tests;".to_string(),
        "- no unrelated refactoring or reformatting;".to_string(),
        "- never delete, ignore or weaken existing tests to make them pass.".to_string(),
        String::new(),
        format!(
            "Self-check: after each patch run `{build_cmd}` in the crate root and keep \
             patching until it passes."
        ),
        String::new(),
        "Build output:".to_string(),
        format!("<{BUILD_ERROR_TAG}>"),
        diagnostic.trim_end().to_string(),
        format!("</{BUILD_ERROR_TAG}>"),
    ]);
    lines.join("\n")
}

/// Append configured free-text guidance under a fixed header.
pub fn with_additional_notes(prompt: String, notes: &str) -> String {
    let notes = notes.trim();
    if notes.is_empty() {
        return prompt;
    }
    format!("{prompt}\n\n{NOTES_HEADER}\n{notes}")
}

/// Suffix for a contract retry after unparsable output.
pub fn parse_retry_hint(error: &str) -> String {
    format!(
        "\n\nYour previous answer could not be parsed:\n- {error}\n\n\
         Output exactly one <{SUMMARY_TAG}> block containing a single JSON object. \
         Check quotes, commas and braces."
    )
}

/// Ask whether a call subtree can be replaced by an existing crate.
pub fn library_evaluation(subtree: &str, denylist: &[String]) -> String {
    let denied = if denylist.is_empty() {
        "(none)".to_string()
    } else {
        denylist.join(", ")
    };
    format!(
        "Decide whether the whole C call subtree below can be replaced by one or more \
         mature Rust crates (or std) without reimplementing it.\n\n\
         {subtree}\n\n\
         Disallowed libraries (never propose these): {denied}\n\n\
         Answer with exactly one block:\n\
         <{SUMMARY_TAG}>\n\
         {{\n  \"replaceable\": true | false,\n  \"libraries\": [\"crate\", ...],\n  \
         \"library\": \"primary crate\",\n  \"apis\": [\"crate::path::item\", ...],\n  \
         \"confidence\": 0.0-1.0,\n  \"notes\": \"short rationale\"\n}}\n\
         </{SUMMARY_TAG}>"
    )
}

/// Ask the agent to judge a suspected test deletion.
pub fn deletion_arbitration(findings: &[String], diff: &str) -> String {
    let findings = findings
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "An automated fix removed test code. Decide whether the removal is a legitimate \
         update (test moved, renamed or made obsolete by the fix) or a weakening of the \
         test suite.\n\nFindings:\n{findings}\n\nDiff:\n<DIFF>\n{}\n</DIFF>\n\n\
         Reply {YES_MARKER} if the removal is legitimate, {NO_MARKER} if it must be \
         rolled back.",
        diff.trim_end()
    )
}

/// Ask for a C/Rust behavioural alignment verdict.
pub fn alignment_analysis(crate_dir: &Path, source_root: &Path) -> String {
    format!(
        "Compare the Rust crate at {} with the C sources at {} and check that the Rust \
         code preserves the C behaviour (missing functions, diverging logic, unhandled \
         error paths, stubbed bodies).\n\
         Write the detailed findings to `{ALIGNMENT_REPORT_FILE}` in the crate root.\n\n\
         Then answer with exactly one block:\n\
         <{SUMMARY_TAG}>\n\
         {{\"is_aligned\": true | false, \"summary\": \"one paragraph\", \
         \"report_path\": \"{ALIGNMENT_REPORT_FILE}\"}}\n\
         </{SUMMARY_TAG}>",
        crate_dir.display(),
        source_root.display()
    )
}

/// Ask the agent to close the gaps listed in an alignment report.
pub fn alignment_optimization(report: &str) -> String {
    format!(
        "Fix the behavioural differences listed in this alignment report. Keep every \
         existing test and keep the crate building.\n\n<REPORT>\n{}\n</REPORT>",
        report.trim_end()
    )
}
