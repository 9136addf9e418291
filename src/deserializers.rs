//! Custom deserializers for flexible parsing of workflow engine payloads.
//!
//! The engine emits loosely shaped JSON (lists sometimes rendered as
//! comma-separated strings, ids sometimes numeric). These helpers accept the
//! shapes seen in practice and fall back to empty values instead of failing.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Split a comma-separated string into trimmed, non-empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deserializes a list of strings from either a JSON array or a comma-separated string.
///
/// # Accepted Formats
///
/// ```json
/// { "ai_technologies": ["LLM", "RAG"] }
/// { "ia_utilisee": "LLM, RAG" }
/// { "ia_utilisee": null }
/// ```
///
/// Non-string array members are stringified; other types yield an empty list.
pub fn de_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => split_list(&s),
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => {
                    let t = s.trim();
                    (!t.is_empty()).then(|| t.to_string())
                }
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(_) => Vec::new(),
    })
}

/// Optional variant of [`de_string_or_list`] for patch bodies: an absent field
/// stays `None` (via `#[serde(default)]`), a present one is parsed leniently.
pub fn de_option_string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    de_string_or_list(deserializer).map(Some)
}

/// Deserializes a string from a string, number or boolean; null becomes empty.
pub fn de_string_lossy<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    })
}

/// Same as [`de_string_lossy`] but empty strings become `None`.
pub fn de_option_string_lossy<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = de_string_lossy(deserializer)?;
    let t = s.trim();
    Ok((!t.is_empty()).then(|| t.to_string()))
}
