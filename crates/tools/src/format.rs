//! Result formatting shared by the capability tools.
//!
//! Tools keep their own output compact. The invoker still applies the
//! authoritative hard cap afterwards.

use serde_json::{Value, json};
use triage_core::error::ToolError;
use triage_core::service::Service;

/// Marker appended when a tool's own formatting cuts its JSON output.
pub const FORMAT_TRUNCATION_MARKER: &str = "\n\n... [truncated – use more specific filters to narrow results]";

/// Default size limit for tool-side JSON formatting.
pub const DEFAULT_JSON_LIMIT: usize = 8000;

/// Take at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Pretty-print a value, cutting it at `max_len` characters.
pub fn safe_json(value: &Value, max_len: usize) -> String {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if rendered.chars().count() > max_len {
        format!("{}{}", truncate_chars(&rendered, max_len), FORMAT_TRUNCATION_MARKER)
    } else {
        rendered
    }
}

/// Keep only `keys` of each object, capped at `max_items`.
///
/// Non-object items pass through unchanged. When items were dropped a
/// trailing `_note` entry says so.
pub fn compact_list(items: &[Value], keys: &[&str], max_items: usize) -> Vec<Value> {
    let mut results: Vec<Value> = items
        .iter()
        .take(max_items)
        .map(|item| match item.as_object() {
            Some(obj) => Value::Object(
                keys.iter()
                    .filter_map(|k| obj.get(*k).map(|v| (k.to_string(), v.clone())))
                    .collect(),
            ),
            None => item.clone(),
        })
        .collect();

    if items.len() > max_items {
        results.push(json!({
            "_note": format!("Showing {max_items} of {} total. Use search/filters to narrow.", items.len())
        }));
    }
    results
}

/// The first array found under any of `keys`, or the value itself if it is an array.
pub fn find_list<'a>(value: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(list) = value.as_array() {
        return list;
    }
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Round to four decimal places.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// `value[key]`, or `null` when absent.
pub fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

/// A required, non-empty string argument.
pub fn required_str<'a>(args: &'a Value, key: &str, service: Service) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments {
            service: service.display_name().into(),
            message: format!("Missing '{key}' argument"),
        })
}

/// An optional string argument; empty strings count as absent.
pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}
