use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmitheryRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "tool")]
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SmitheryPart {
    Text { text: String },
}

impl SmitheryPart {
    pub fn text(text: impl Into<String>) -> Self {
        SmitheryPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmitheryMessage {
    pub role: SmitheryRole,
    pub parts: Vec<SmitheryPart>,
    /// `msg-` followed by 16 lowercase hex characters.
    pub id: String,
}

/// Body of `POST /api/chat` on the playground.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmitheryChatRequest {
    pub messages: Vec<SmitheryMessage>,
    /// The playground never receives tool definitions from us.
    pub tools: Vec<JsonValue>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub stream: bool,
}
