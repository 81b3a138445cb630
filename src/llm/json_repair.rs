//! Tolerant JSON extraction from LLM replies
//!
//! Models wrap JSON in markdown fences, prepend prose, and truncate output
//! mid-object. The extractor strips fences, locates the outer `{...}`, and
//! then tries progressively more aggressive repairs:
//!
//! 1. parse the raw candidate
//! 2. append missing closing braces / brackets
//! 3. trim back to the last comma and close
//! 4. trim back to the last complete quoted string and close

use serde_json::Value;

/// Extract a JSON object from raw model output. Returns `None` when nothing
/// salvageable is present.
pub fn extract_json(content: &str) -> Option<Value> {
    if content.is_empty() {
        return None;
    }

    let cleaned = content.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let start = cleaned.find('{')?;
    let candidate = &cleaned[start..];

    // Prefer the first balanced object, ignoring trailing prose
    if let Some(balanced) = balanced_object(candidate) {
        if let Ok(value) = serde_json::from_str::<Value>(balanced) {
            return Some(value);
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    // Repair 1: append missing closers
    if let Some(value) = parse_with_closers(candidate) {
        return Some(value);
    }

    // Repair 2: trim at the last comma, then close
    if let Some(pos) = candidate.rfind(',') {
        if let Some(value) = parse_with_closers(&candidate[..pos]) {
            return Some(value);
        }
    }

    // Repair 3: trim at the last closing quote, then close
    if let Some(pos) = candidate.rfind('"') {
        if let Some(value) = parse_with_closers(&candidate[..=pos]) {
            return Some(value);
        }
    }

    None
}

/// Slice of the first balanced `{...}` object, if the braces ever balance.
fn balanced_object(s: &str) -> Option<&str> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Append the closers an unbalanced candidate is missing and try to parse.
fn parse_with_closers(candidate: &str) -> Option<Value> {
    let trimmed = candidate.trim_end().trim_end_matches(',');

    let mut depth_braces = 0i32;
    let mut depth_brackets = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in trimmed.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth_braces += 1,
            '}' if !in_string => depth_braces -= 1,
            '[' if !in_string => depth_brackets += 1,
            ']' if !in_string => depth_brackets -= 1,
            _ => {}
        }
    }

    let mut repaired = trimmed.to_string();
    if in_string {
        repaired.push('"');
    }
    for _ in 0..depth_brackets.max(0) {
        repaired.push(']');
    }
    for _ in 0..depth_braces.max(0) {
        repaired.push('}');
    }

    serde_json::from_str(&repaired).ok()
}

/// Fetch a string field, tolerating absent keys.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Fetch a numeric field, tolerating numbers encoded as strings.
pub fn f64_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Fetch a boolean field, tolerating "true"/"false" strings.
pub fn bool_field(value: &Value, key: &str) -> Option<bool> {
    match value.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}
