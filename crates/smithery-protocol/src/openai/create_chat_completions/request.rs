use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::openai::create_chat_completions::types::{
    ChatCompletionRequestMessage, StopConfiguration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateChatCompletionRequestBody {
    /// A list of messages comprising the conversation so far.
    /// Must contain at least 1 message (checked by `validate`).
    pub messages: Vec<ChatCompletionRequestMessage>,
    /// Model ID used to generate the response.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Range is 0..=2.0 (not enforced here).
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Range is 0.0..=1.0 (not enforced here).
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl CreateChatCompletionRequestBody {
    pub fn new(model: impl Into<String>, messages: Vec<ChatCompletionRequestMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            stream: None,
            stream_options: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            max_completion_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            stop: None,
            n: None,
            seed: None,
            user: None,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Structural checks the wire format cannot express.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty");
        }
        if self.messages.is_empty() {
            return Err("messages must contain at least one message");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CreateChatCompletionRequest {
    pub body: CreateChatCompletionRequestBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::create_chat_completions::types::{
        ChatCompletionMessageContent, ChatCompletionRole,
    };

    #[test]
    fn parses_string_and_part_content() {
        let body: CreateChatCompletionRequestBody = serde_json::from_value(serde_json::json!({
            "model": "claude-haiku-4.5",
            "stream": true,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": [{"type": "text", "text": "hi"}]}
            ]
        }))
        .expect("request should parse");

        assert!(body.is_stream());
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, ChatCompletionRole::System);
        match &body.messages[1].content {
            Some(ChatCompletionMessageContent::Parts(parts)) => {
                assert_eq!(parts[0].kind, "text");
                assert_eq!(parts[0].text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_messages_and_model() {
        let body = CreateChatCompletionRequestBody::new("gpt-5", Vec::new());
        assert!(body.validate().is_err());

        let body = CreateChatCompletionRequestBody::new(
            "  ",
            vec![ChatCompletionRequestMessage::text(ChatCompletionRole::User, "hi")],
        );
        assert!(body.validate().is_err());
    }
}
