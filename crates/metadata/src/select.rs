//! Dotted-key selection over a raw metadata document.
//!
//! Keys may themselves contain dots (`AWS::CloudFormation::Init` does not, but
//! user metadata keys often do), so lookup first tries the longest literal key
//! and only then splits.

use crate::error::{DecodeError, Result};
use serde_json::Value;

/// Render the whole document, or the value at a dotted `key`.
///
/// Objects and arrays are pretty-printed; a string value is printed raw.
pub fn select(raw: &Value, key: Option<&str>) -> Result<String> {
    let value = match key.map(str::trim).filter(|k| !k.is_empty()) {
        None => raw,
        Some(key) => lookup(raw, key).ok_or_else(|| DecodeError::KeyNotFound(key.to_string()))?,
    };
    Ok(render(value))
}

/// Find the value at a dotted path, preferring literal keys that contain dots.
pub fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    if let Some(found) = object.get(key) {
        return Some(found);
    }

    key.char_indices()
        .rev()
        .filter(|&(_, c)| c == '.')
        .find_map(|(at, _)| {
            let (head, tail) = (&key[..at], &key[at + 1..]);
            object.get(head).and_then(|child| lookup(child, tail))
        })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => format!("{other:#}"),
    }
}
