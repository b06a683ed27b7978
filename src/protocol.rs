//! Request payload shapes and response framing.
//!
//! One JSON document per connection. The document's shape decides what it is:
//!
//! | Payload                                  | Meaning                        | Response        |
//! |------------------------------------------|--------------------------------|-----------------|
//! | `{"requests": [...], "dns_settings": {}}` | batch, overrides applied first | array           |
//! | `{"pinyin": "<text>"}`                   | initial-letter query           | `{"result": ..}` |
//! | `[...]`                                  | legacy batch                   | array           |
//! | `{...}`                                  | legacy single fetch            | object          |

use crate::base::neterror::NetError;
use crate::http::{FetchResult, FetchSpec};
use serde_json::{json, Map, Value};

/// A decoded request document.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Batch {
        requests: Vec<FetchSpec>,
        dns_settings: Option<Map<String, Value>>,
    },
    /// The raw `pinyin` member; only strings are valid queries.
    Pinyin(Value),
    LegacyBatch(Vec<FetchSpec>),
    LegacySingle(FetchSpec),
}

impl Payload {
    /// Classifies a parsed document. Checks run in a fixed order: `requests`,
    /// then `pinyin`, then array, then any other object.
    pub fn classify(value: Value) -> Result<Payload, NetError> {
        match value {
            Value::Object(mut map) => {
                if let Some(requests) = map.remove("requests") {
                    let Value::Array(items) = requests else {
                        return Err(NetError::MalformedPayload("`requests` is not an array".into()));
                    };
                    let dns_settings = match map.remove("dns_settings") {
                        Some(Value::Object(settings)) => Some(settings),
                        Some(Value::Null) | None => None,
                        Some(other) => {
                            tracing::warn!(value = %other, "ignoring non-object dns_settings");
                            None
                        }
                    };
                    return Ok(Payload::Batch {
                        requests: items.iter().map(FetchSpec::from_value).collect(),
                        dns_settings,
                    });
                }
                if let Some(text) = map.remove("pinyin") {
                    return Ok(Payload::Pinyin(text));
                }
                Ok(Payload::LegacySingle(FetchSpec::from_value(&Value::Object(map))))
            }
            Value::Array(items) => Ok(Payload::LegacyBatch(
                items.iter().map(FetchSpec::from_value).collect(),
            )),
            other => Err(NetError::MalformedPayload(format!(
                "expected an object or array, got {}",
                kind(&other)
            ))),
        }
    }

    /// Parses and classifies raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Payload, NetError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| NetError::MalformedPayload(e.to_string()))?;
        Self::classify(value)
    }

    /// Fetch specs carried by this payload.
    pub fn specs(&self) -> &[FetchSpec] {
        match self {
            Payload::Batch { requests, .. } => requests,
            Payload::LegacyBatch(specs) => specs,
            Payload::LegacySingle(spec) => std::slice::from_ref(spec),
            Payload::Pinyin(_) => &[],
        }
    }

    /// Renders fetch results in the shape this payload expects.
    pub fn respond(&self, results: Vec<FetchResult>) -> Value {
        match self {
            Payload::LegacySingle(_) => results
                .into_iter()
                .next()
                .map(|r| r.to_value())
                .unwrap_or_else(|| FetchResult::no_url().to_value()),
            _ => Value::Array(results.iter().map(FetchResult::to_value).collect()),
        }
    }
}

/// Response to an initial-letter query.
pub fn pinyin_response(result: Result<String, String>) -> Value {
    match result {
        Ok(text) => json!({ "result": text }),
        Err(error) => json!({ "error": error }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
