// Structured-output validation
//
// Every structured call is turned into `Result<T, SchemaError>` before use.
// Target types use `#[serde(deny_unknown_fields)]`, so both missing and
// extra keys are rejected.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::types::StructuredReply;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("generation service refused: {0}")]
    Refused(String),
    #[error("no structured payload returned")]
    Empty,
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload does not match schema: {0}")]
    Shape(String),
    #[error("field `{0}` must not be empty")]
    EmptyField(String),
}

/// Convert a structured reply into a typed value.
pub fn parse_structured<T: DeserializeOwned>(reply: StructuredReply) -> Result<T, SchemaError> {
    if let Some(reason) = reply.refusal {
        return Err(SchemaError::Refused(reason));
    }

    let value = match reply.value {
        None | Some(Value::Null) => return Err(SchemaError::Empty),
        // Some services return the object as a JSON string
        Some(Value::String(text)) => {
            let stripped = strip_markdown_fences(&text);
            serde_json::from_str::<Value>(stripped)
                .map_err(|e| SchemaError::InvalidJson(e.to_string()))?
        }
        Some(other) => other,
    };

    serde_json::from_value(value).map_err(|e| SchemaError::Shape(e.to_string()))
}

/// Reject blank strings in required text fields
pub fn require_non_empty(field: &str, value: &str) -> Result<(), SchemaError> {
    if value.trim().is_empty() {
        Err(SchemaError::EmptyField(field.to_string()))
    } else {
        Ok(())
    }
}

/// Strip leading/trailing markdown code fences (```json ... ``` or ``` ... ```)
pub fn strip_markdown_fences(s: &str) -> &str {
    let s = s.trim();
    let s = if let Some(rest) = s.strip_prefix("```json") {
        rest
    } else if let Some(rest) = s.strip_prefix("```") {
        rest
    } else {
        s
    };
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}
