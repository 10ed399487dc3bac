//! Parse model output into a [`Payload`].

use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::types::Payload;

#[allow(clippy::expect_used)]
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```").expect("valid fence pattern")
});

/// Parse a model response into a structured payload.
///
/// Models sometimes wrap JSON in a markdown code block or add prose around
/// it. The first fenced block wins; otherwise the outermost `{...}` span is
/// used. Errors keep the raw response for diagnosis.
pub fn parse_payload(raw: &str) -> Result<Payload> {
    let candidate = extract_json(raw);

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| ProviderError::parse(format!("invalid JSON: {e}"), raw))?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProviderError::parse(
            format!("expected a JSON object, got {}", json_type(&other)),
            raw,
        )),
    }
}

fn extract_json(raw: &str) -> &str {
    if let Some(body) = FENCE.captures(raw).and_then(|caps| caps.get(1)) {
        return body.as_str().trim();
    }

    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
