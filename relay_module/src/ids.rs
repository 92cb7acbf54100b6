//! Serde helpers for platform identifiers that arrive as either JSON numbers
//! or strings (Chatwoot ids are numeric, stored mapping values are strings).

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(de::Error::custom(format!(
            "expected non-empty string or numeric id, got {}",
            other
        ))),
    }
}

pub(crate) fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_id(&Value::deserialize(deserializer)?))
}

/// Returns a trimmed, non-empty identifier for string and numeric values.
pub(crate) fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}
