use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const TEXT_DELTA_EVENT: &str = "text-delta";

/// One decoded `data:` payload from the playground stream.
///
/// Only text deltas matter to the proxy. Other event types (`start`,
/// `finish`, tool and metadata events) deserialize fine and are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmitheryStreamEvent {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<SmitheryDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SmitheryDelta {
    Text(String),
    Structured { text: Option<String> },
    Other(JsonValue),
}

impl SmitheryStreamEvent {
    pub fn is_text_delta(&self) -> bool {
        match self.kind.as_deref() {
            None => true,
            Some(kind) => kind == TEXT_DELTA_EVENT,
        }
    }

    /// The text carried by a text-delta event. Non-string payloads are
    /// rendered as compact JSON.
    pub fn text_delta(&self) -> Option<String> {
        if !self.is_text_delta() {
            return None;
        }
        match self.delta.as_ref()? {
            SmitheryDelta::Text(text) => Some(text.clone()),
            SmitheryDelta::Structured { text } => text.clone(),
            SmitheryDelta::Other(JsonValue::Null) => None,
            SmitheryDelta::Other(value) => Some(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> SmitheryStreamEvent {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn reads_string_and_object_deltas() {
        assert_eq!(parse(r#"{"delta":"He"}"#).text_delta().as_deref(), Some("He"));
        assert_eq!(
            parse(r#"{"type":"text-delta","id":"0","delta":{"text":"llo"}}"#)
                .text_delta()
                .as_deref(),
            Some("llo")
        );
        assert_eq!(
            parse(r#"{"type":"text-delta","delta":42}"#).text_delta().as_deref(),
            Some("42")
        );
    }

    #[test]
    fn ignores_other_event_types() {
        assert_eq!(parse(r#"{"type":"start","messageId":"m"}"#).text_delta(), None);
        assert_eq!(
            parse(r#"{"type":"tool-input-delta","delta":"{}"}"#).text_delta(),
            None
        );
        assert_eq!(parse(r#"{"type":"text-delta"}"#).text_delta(), None);
    }
}
