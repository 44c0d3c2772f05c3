//! Stream frame types and classification

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix that marks a frame line on the wire
pub const DATA_PREFIX: &str = "data: ";

/// Side-channel statistics delivered with the terminal `done` frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Number of content instances the agent used as context
    #[serde(default)]
    pub total_instances: u64,
    /// Number of knowledge base files the agent used as context
    #[serde(default)]
    pub total_knowledge_files: u64,
    /// Any other fields the backend chose to send
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One decoded `data: <json>` line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Generation accepted by the backend
    Start,
    /// Human-readable progress notice (e.g. a retry)
    Info { message: String },
    /// Incremental text chunk
    Content { text: String },
    /// Terminal success
    Done {
        #[serde(default)]
        generated_value: Value,
        #[serde(
            rename = "context_metadata",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        metadata: Option<ContextMetadata>,
    },
    /// Terminal failure
    Error { message: String },
}

impl StreamFrame {
    /// Check if this is a terminal frame (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done { .. } | StreamFrame::Error { .. })
    }

    /// Classify a parsed JSON payload.
    ///
    /// Returns `None` for payloads that are not frames this client knows
    /// about: non-objects, unknown `type` values, and content frames without
    /// text. An object without `type` but with an `error` key is the legacy
    /// error shape.
    pub fn classify(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        match obj.get("type") {
            Some(Value::String(kind)) => match kind.as_str() {
                "start" => Some(StreamFrame::Start),
                "info" => Some(StreamFrame::Info {
                    message: string_field(obj, "message").unwrap_or_default(),
                }),
                "content" => match string_field(obj, "text") {
                    Some(text) => Some(StreamFrame::Content { text }),
                    None => {
                        tracing::debug!("Ignoring content frame without text");
                        None
                    }
                },
                "done" => Some(StreamFrame::Done {
                    generated_value: obj.get("generated_value").cloned().unwrap_or(Value::Null),
                    metadata: obj
                        .get("context_metadata")
                        .filter(|m| m.is_object())
                        .and_then(|m| serde_json::from_value(m.clone()).ok()),
                }),
                "error" => Some(StreamFrame::Error {
                    message: error_message(obj),
                }),
                other => {
                    tracing::debug!("Ignoring frame with unknown type '{}'", other);
                    None
                }
            },
            Some(Value::Null) | None if obj.contains_key("error") => Some(StreamFrame::Error {
                message: error_message(obj),
            }),
            _ => None,
        }
    }

    /// Parse one wire line. Lines without the `data: ` prefix and payloads
    /// that are not JSON yield `None`; the latter are logged.
    pub fn parse_line(line: &str) -> Option<Self> {
        let payload = line.strip_prefix(DATA_PREFIX)?;
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => Self::classify(&value),
            Err(e) => {
                tracing::warn!("Skipping malformed stream frame: {} ({})", payload, e);
                None
            }
        }
    }

    /// Encode this frame as a wire line, including the blank separator line
    pub fn to_sse_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{DATA_PREFIX}{json}\n\n")
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn error_message(obj: &Map<String, Value>) -> String {
    if let Some(message) = string_field(obj, "message") {
        return message;
    }
    match obj.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(inner)) => {
            string_field(inner, "message").unwrap_or_else(|| Value::Object(inner.clone()).to_string())
        }
        Some(Value::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}
