//! `<TAG>...</TAG>` extraction from free-text oracle answers.

use regex::Regex;

/// Inner text of the first `<tag>...</tag>` block, tag matched
/// case-insensitively. `None` when no complete block exists.
pub fn extract_tagged_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let tag = regex::escape(tag);
    let re = Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>")).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// The tagged block, or the whole trimmed answer when there is none.
pub fn block_or_whole<'a>(text: &'a str, tag: &str) -> &'a str {
    extract_tagged_block(text, tag).unwrap_or_else(|| text.trim())
}
