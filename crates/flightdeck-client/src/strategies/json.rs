//! Helpers for ATS JSON payloads.

use flightdeck_core::error::{AppError, ExtractionKind};
use scraper::Html;
use serde_json::Value;

use super::selector;

/// Parse an API response body, reporting failures as parse errors.
pub(super) fn parse_body(body: &str, what: &str) -> Result<Value, AppError> {
    serde_json::from_str(body).map_err(|e| {
        AppError::extraction(ExtractionKind::Parse, format!("{what} is not valid JSON: {e}"))
    })
}

/// Walk a dot-separated path and return the value as text.
/// Numbers are rendered; blank strings count as missing.
pub(super) fn text_at(value: &Value, path: &str) -> Option<String> {
    let found = path
        .split('.')
        .try_fold(value, |current, key| current.get(key))?;
    match found {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First array stored under `key` anywhere in the document, depth-first.
pub(super) fn find_array<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get(key) {
                return Some(items);
            }
            map.values().find_map(|v| find_array(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_array(v, key)),
        _ => None,
    }
}

/// JSON objects embedded in inline `<script>` blocks, either as whole
/// JSON scripts or as `var x = {...};` assignments.
pub(super) fn embedded_json(html: &str) -> Result<Vec<Value>, AppError> {
    let scripts = selector("script")?;
    let doc = Html::parse_document(html);
    Ok(doc
        .select(&scripts)
        .filter(|s| s.value().attr("src").is_none())
        .filter_map(|s| {
            let text = s.text().collect::<String>();
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            (start < end)
                .then(|| serde_json::from_str::<Value>(&text[start..=end]).ok())
                .flatten()
        })
        .collect())
}
