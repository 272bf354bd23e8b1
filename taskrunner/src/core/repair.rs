//! Recovery of JSON from model output.
//!
//! Completion models wrap JSON in code fences, surround it with prose, emit
//! invalid backslash escapes (Windows paths, regexes), leave trailing commas,
//! and put raw newlines inside strings. These helpers undo that before a
//! structured parse; they never invent content.

use serde_json::Value;
use tracing::debug;

use crate::error::PlanError;

/// Extract and parse the JSON payload from raw completion text.
pub fn parse_model_json(text: &str) -> Result<Value, PlanError> {
    let candidate = extract_json(text)
        .ok_or_else(|| PlanError::Parse("no JSON object found in model output".to_string()))?;

    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(first) => {
            let repaired = repair_json(candidate);
            debug!(error = %first, "direct parse failed, retrying after repair");
            serde_json::from_str(&repaired)
                .map_err(|err| PlanError::Parse(format!("{err} (before repair: {first})")))
        }
    }
}

/// Strip fenced-code wrappers and surrounding prose, returning the outermost
/// JSON object or array.
pub fn extract_json(text: &str) -> Option<&str> {
    let body = strip_fence(text).trim();
    let open = body.find(['{', '['])?;
    let close_char = if body[open..].starts_with('{') { '}' } else { ']' };
    let close = body.rfind(close_char)?;
    if close < open {
        return None;
    }
    Some(&body[open..=close])
}

/// Body of an outer code fence, if the reply is fenced.
///
/// The opening fence must start a line with nothing but prose before it, so
/// fences inside JSON string values are left alone. The body runs to the last
/// bare closing fence line.
fn strip_fence(text: &str) -> &str {
    let mut offset = 0;
    let mut body_start = None;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            if text[..offset].contains(['{', '[']) {
                return text;
            }
            body_start = Some(offset + line.len());
            break;
        }
        offset += line.len();
    }
    let Some(body_start) = body_start else {
        return text;
    };

    let body = &text[body_start..];
    let mut close = None;
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim() == "```" {
            close = Some(offset);
        }
        offset += line.len();
    }
    match close {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Repair common escaping and punctuation mistakes, string-aware.
///
/// - backslashes that do not start a valid JSON escape are doubled
/// - raw newlines, carriage returns, and tabs inside strings are escaped
/// - commas directly before `}` or `]` are removed
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            match ch {
                '\\' => match chars.get(i + 1) {
                    Some(next) if is_valid_escape(*next, &chars[i + 1..]) => {
                        out.push(ch);
                        out.push(*next);
                        i += 2;
                        continue;
                    }
                    _ => out.push_str("\\\\"),
                },
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
        } else {
            match ch {
                '"' => {
                    in_string = true;
                    out.push(ch);
                }
                ',' if next_significant(&chars[i + 1..]).is_some_and(|c| c == '}' || c == ']') => {}
                _ => out.push(ch),
            }
        }
        i += 1;
    }

    out
}

fn is_valid_escape(next: char, rest: &[char]) -> bool {
    match next {
        '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => true,
        'u' => rest.len() >= 5 && rest[1..5].iter().all(char::is_ascii_hexdigit),
        _ => false,
    }
}

fn next_significant(rest: &[char]) -> Option<char> {
    rest.iter().copied().find(|c| !c.is_whitespace())
}
