//! Reply normalization — turns whatever the webhook returned into display text
//!
//! The webhook's response contract is not guaranteed, so the body runs
//! through an ordered chain of `ReplyStrategy` implementations; the first one
//! that yields text wins:
//! 1. **PrimaryField** — `{"response": "..."}`
//! 2. **AlternateFields** — `message`, `text`, `content`, `reply`, `answer`, `result`
//! 3. **StructuredDump** — pretty-printed, truncated JSON for any other object/array
//!
//! Bodies that are not JSON at all are shown as (truncated) raw text. When
//! nothing matches, a generic acknowledgment is shown.

use serde_json::Value;

/// Character limit for raw-text and JSON-dump replies
pub const TRUNCATE_AT: usize = 500;

/// Field names tried, in order, after `response`
pub const ALTERNATE_FIELDS: [&str; 6] = ["message", "text", "content", "reply", "answer", "result"];

pub const ACKNOWLEDGMENT: &str = "Message received.";

/// Cut `text` to `limit` characters, appending `...` when anything was dropped.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

// ============================================================================
// ReplyStrategy trait
// ============================================================================

/// One link in the extraction chain.
pub trait ReplyStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &str;

    fn extract(&self, value: &Value) -> Option<String>;
}

/// The `response` string field.
pub struct PrimaryField;

impl ReplyStrategy for PrimaryField {
    fn name(&self) -> &str {
        "response"
    }

    fn extract(&self, value: &Value) -> Option<String> {
        non_empty_str(value, "response").map(str::to_string)
    }
}

/// First string-typed match among a fixed list of field names.
pub struct AlternateFields {
    fields: Vec<String>,
}

impl AlternateFields {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Default for AlternateFields {
    fn default() -> Self {
        Self::new(&ALTERNATE_FIELDS)
    }
}

impl ReplyStrategy for AlternateFields {
    fn name(&self) -> &str {
        "alternate_fields"
    }

    fn extract(&self, value: &Value) -> Option<String> {
        self.fields
            .iter()
            .find_map(|f| non_empty_str(value, f))
            .map(str::to_string)
    }
}

/// Pretty-printed JSON for objects and arrays nothing else could read.
pub struct StructuredDump {
    limit: usize,
}

impl StructuredDump {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl ReplyStrategy for StructuredDump {
    fn name(&self) -> &str {
        "structured_dump"
    }

    fn extract(&self, value: &Value) -> Option<String> {
        if !(value.is_object() || value.is_array()) {
            return None;
        }
        serde_json::to_string_pretty(value)
            .ok()
            .map(|s| truncate(&s, self.limit))
    }
}

// ============================================================================
// ReplyParser
// ============================================================================

pub struct ReplyParser {
    strategies: Vec<Box<dyn ReplyStrategy>>,
    raw_limit: usize,
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self::new(vec![
            Box::new(PrimaryField),
            Box::new(AlternateFields::default()),
            Box::new(StructuredDump::new(TRUNCATE_AT)),
        ])
    }
}

impl ReplyParser {
    pub fn new(strategies: Vec<Box<dyn ReplyStrategy>>) -> Self {
        Self {
            strategies,
            raw_limit: TRUNCATE_AT,
        }
    }

    /// Interpret a successful response body.
    pub fn interpret_body(&self, body: &str) -> String {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => self.interpret_value(&value),
            Err(e) => {
                tracing::debug!(error = %e, "Reply is not JSON, showing raw text");
                if body.trim().is_empty() {
                    ACKNOWLEDGMENT.to_string()
                } else {
                    truncate(body, self.raw_limit)
                }
            }
        }
    }

    pub fn interpret_value(&self, value: &Value) -> String {
        for strategy in &self.strategies {
            if let Some(text) = strategy.extract(value) {
                tracing::debug!(strategy = strategy.name(), "Extracted reply text");
                return text;
            }
        }
        ACKNOWLEDGMENT.to_string()
    }
}
