//! The "is this subtree replaceable by a library" protocol.
//!
//! One oracle answer is expected to hold a `<SUMMARY>` block with a relaxed
//! JSON object. Unparsable answers are retried with the parse error appended
//! to the prompt, up to [`MAX_LLM_RETRIES`] invocations in total. Parsed
//! answers are normalized into a [`LibraryReplacementVerdict`]; a library on
//! the denylist always forces `replaceable = false`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::tagged_block::block_or_whole;
use super::tolerant_json;
use crate::domain::{C2rsError, LibraryReplacementVerdict, RepairOptions, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::oracle::{NoopObserver, Oracle, OracleRequest};
use crate::prompts;

/// Oracle invocations per evaluation.
pub const MAX_LLM_RETRIES: u32 = 3;

/// Libraries that may never be proposed, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Denylist {
    entries: Vec<String>,
    normalized: BTreeSet<String>,
}

impl Denylist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries: Vec<String> = entries
            .into_iter()
            .map(|e| e.as_ref().trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        let normalized = entries.iter().map(|e| e.to_lowercase()).collect();
        Self {
            entries,
            normalized,
        }
    }

    pub fn contains(&self, library: &str) -> bool {
        self.normalized.contains(&library.trim().to_lowercase())
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extract and parse the summary object from a raw answer.
pub fn parse_summary(answer: &str) -> std::result::Result<Map<String, Value>, String> {
    if answer.trim().is_empty() {
        return Err("empty answer".to_string());
    }
    let block = block_or_whole(answer, prompts::SUMMARY_TAG);
    if block.is_empty() {
        return Err("empty <SUMMARY> block".to_string());
    }
    match tolerant_json::parse(block) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("JSON parse failed: {e}")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// A list, or a comma-separated string, of non-empty names.
fn name_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// Canonical verdict from a parsed summary object.
pub fn normalize_verdict(obj: &Map<String, Value>, denylist: &Denylist) -> LibraryReplacementVerdict {
    let mut replaceable = obj.get("replaceable") == Some(&Value::Bool(true));
    let library = text_field(obj, "library");

    let mut api = text_field(obj, "api");
    if api.is_empty() {
        api = text_field(obj, "function");
    }
    let mut apis = name_list(obj.get("apis"));
    if apis.is_empty() && !api.is_empty() {
        apis.push(api.clone());
    }
    if api.is_empty() {
        api = apis.first().cloned().unwrap_or_default();
    }

    let mut libraries = name_list(obj.get("libraries"));
    if libraries.is_empty() && !library.is_empty() {
        libraries.push(library.clone());
    }

    let mut notes = text_field(obj, "notes");
    let hits: BTreeSet<&str> = libraries
        .iter()
        .map(String::as_str)
        .chain((!library.is_empty()).then_some(library.as_str()))
        .filter(|name| denylist.contains(name))
        .collect();
    if !hits.is_empty() {
        replaceable = false;
        METRICS.inc_denylist_overrides();
        let hit = format!(
            "denylist hit: {}",
            hits.into_iter().collect::<Vec<_>>().join(", ")
        );
        notes = if notes.is_empty() {
            hit
        } else {
            format!("{notes} | {hit}")
        };
    }

    LibraryReplacementVerdict {
        replaceable,
        library,
        libraries,
        api,
        apis,
        confidence: confidence(obj.get("confidence")),
        notes,
    }
}

/// Verdict plus how many invocations it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: LibraryReplacementVerdict,
    pub attempts: u32,
    /// Last parse or invocation problem, if any attempt failed.
    pub last_error: Option<String>,
}

pub struct ContractEvaluator {
    oracle: Arc<dyn Oracle>,
    denylist: Denylist,
    options: RepairOptions,
    additional_notes: String,
    max_attempts: u32,
}

impl ContractEvaluator {
    pub fn new(oracle: Arc<dyn Oracle>, denylist: Denylist) -> Self {
        Self {
            oracle,
            denylist,
            options: RepairOptions::default(),
            additional_notes: String::new(),
            max_attempts: MAX_LLM_RETRIES,
        }
    }

    pub fn with_options(mut self, options: RepairOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_additional_notes(mut self, notes: impl Into<String>) -> Self {
        self.additional_notes = notes.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn denylist(&self) -> &Denylist {
        &self.denylist
    }

    /// Ask whether the subtree rooted at `root` can be replaced.
    ///
    /// Never fails on bad answers: exhaustion yields a non-replaceable
    /// verdict. A failed invocation counts as a failed attempt; only
    /// environment faults (the agent cannot be started) are errors.
    pub async fn evaluate(&self, root: &str, description: &str) -> Result<Evaluation> {
        let base = prompts::with_additional_notes(
            prompts::library_evaluation(description, self.denylist.entries()),
            &self.additional_notes,
        );
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let prompt = match &last_error {
                Some(error) => format!("{base}{}", prompts::parse_retry_hint(error)),
                None => base.clone(),
            };
            let request = OracleRequest::new(format!("library-eval root={root} try={attempt}"), prompt)
                .with_options(&self.options);

            let answer = match self.oracle.invoke(&request, &NoopObserver).await {
                Ok(answer) => answer,
                Err(C2rsError::Oracle(message)) => {
                    let error = format!("invocation failed: {message}");
                    obs::emit_contract_parse_failed(root, attempt, &error);
                    last_error = Some(error);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match parse_summary(&answer) {
                Ok(obj) => {
                    let verdict = normalize_verdict(&obj, &self.denylist);
                    obs::emit_contract_evaluated(root, verdict.replaceable, verdict.confidence, attempt);
                    return Ok(Evaluation {
                        verdict,
                        attempts: attempt,
                        last_error,
                    });
                }
                Err(error) => {
                    obs::emit_contract_parse_failed(root, attempt, &error);
                    last_error = Some(error);
                }
            }
        }

        obs::emit_contract_evaluated(root, false, 0.0, self.max_attempts);
        Ok(Evaluation {
            verdict: LibraryReplacementVerdict::not_replaceable(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}
