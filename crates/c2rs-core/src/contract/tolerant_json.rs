//! Relaxed JSON for oracle output: code fences, `//` and `/* */`
//! comments and trailing commas are removed before strict parsing.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TolerantJsonError {
    #[error("empty document")]
    Empty,

    #[error("unterminated block comment")]
    UnterminatedComment,

    #[error("{0}")]
    Syntax(#[from] serde_json::Error),
}

/// Parse `text` as relaxed JSON.
pub fn parse(text: &str) -> Result<Value, TolerantJsonError> {
    let cleaned = preprocess(strip_code_fence(text))?;
    if cleaned.trim().is_empty() {
        return Err(TolerantJsonError::Empty);
    }
    Ok(serde_json::from_str(&cleaned)?)
}

/// Drop a surrounding Markdown code fence (```` ```json ```` ... ```` ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or_default();
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Remove comments and trailing commas outside string literals.
pub fn preprocess(text: &str) -> Result<String, TolerantJsonError> {
    Ok(strip_trailing_commas(&strip_comments(text)?))
}

fn strip_comments(text: &str) -> Result<String, TolerantJsonError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        closed = true;
                        break;
                    }
                    prev = next;
                }
                if !closed {
                    return Err(TolerantJsonError::UnterminatedComment);
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
