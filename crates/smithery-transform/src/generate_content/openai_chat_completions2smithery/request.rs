use std::collections::BTreeMap;

use smithery_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest as OpenAIChatCompletionRequest;
use smithery_protocol::openai::create_chat_completions::types::{
    ChatCompletionMessageContent, ChatCompletionRequestMessage, ChatCompletionRole,
};
use smithery_protocol::smithery::chat::{
    SmitheryChatRequest, SmitheryMessage, SmitheryPart, SmitheryRole,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported content in message {index}: {reason}")]
    UnsupportedContent { index: usize, reason: String },
}

/// Client-facing model names mapped to upstream model ids. Names without an
/// entry pass through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelAliases {
    aliases: BTreeMap<String, String>,
}

impl ModelAliases {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn resolve<'a>(&'a self, model: &'a str) -> &'a str {
        self.aliases.get(model).map(String::as_str).unwrap_or(model)
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions<'a> {
    pub aliases: Option<&'a ModelAliases>,
    pub system_prompt: Option<&'a str>,
}

/// Convert an OpenAI chat-completions request into a playground chat request.
///
/// Each inbound message becomes exactly one upstream message with a single
/// text part and a fresh id. Sampling parameters have no upstream
/// counterpart and are dropped.
pub fn transform_request(
    request: &OpenAIChatCompletionRequest,
    options: TranslateOptions<'_>,
) -> Result<SmitheryChatRequest, TranslateError> {
    let body = &request.body;
    body.validate()
        .map_err(|reason| TranslateError::InvalidRequest(reason.to_string()))?;

    let messages = body
        .messages
        .iter()
        .enumerate()
        .map(|(index, message)| map_message(index, message))
        .collect::<Result<Vec<_>, _>>()?;

    let model = match options.aliases {
        Some(aliases) => aliases.resolve(&body.model).to_string(),
        None => body.model.clone(),
    };

    Ok(SmitheryChatRequest {
        messages,
        tools: Vec::new(),
        model,
        system_prompt: options.system_prompt.map(str::to_string),
        stream: body.is_stream(),
    })
}

fn map_message(
    index: usize,
    message: &ChatCompletionRequestMessage,
) -> Result<SmitheryMessage, TranslateError> {
    if message
        .tool_calls
        .as_ref()
        .is_some_and(|calls| !calls.is_empty())
    {
        return Err(TranslateError::UnsupportedContent {
            index,
            reason: "tool_calls are not supported".to_string(),
        });
    }

    let text = message_text(index, message.content.as_ref())?;
    Ok(SmitheryMessage {
        role: map_role(message.role),
        parts: vec![SmitheryPart::text(text)],
        id: new_message_id(),
    })
}

fn map_role(role: ChatCompletionRole) -> SmitheryRole {
    match role {
        ChatCompletionRole::System | ChatCompletionRole::Developer => SmitheryRole::System,
        ChatCompletionRole::User => SmitheryRole::User,
        ChatCompletionRole::Assistant => SmitheryRole::Assistant,
        ChatCompletionRole::Tool | ChatCompletionRole::Function => SmitheryRole::Tool,
    }
}

fn message_text(
    index: usize,
    content: Option<&ChatCompletionMessageContent>,
) -> Result<String, TranslateError> {
    match content {
        None => Ok(String::new()),
        Some(ChatCompletionMessageContent::Text(text)) => Ok(text.clone()),
        Some(ChatCompletionMessageContent::Parts(parts)) => {
            let mut text = String::new();
            for part in parts {
                match (part.kind.as_str(), part.text.as_deref()) {
                    ("text", Some(value)) => text.push_str(value),
                    (kind, _) => {
                        return Err(TranslateError::UnsupportedContent {
                            index,
                            reason: format!("content part type `{kind}` is not supported"),
                        });
                    }
                }
            }
            Ok(text)
        }
    }
}

pub fn new_message_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("msg-{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use smithery_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;

    fn request(value: serde_json::Value) -> OpenAIChatCompletionRequest {
        OpenAIChatCompletionRequest {
            body: serde_json::from_value::<CreateChatCompletionRequestBody>(value).unwrap(),
        }
    }

    fn user_hi() -> OpenAIChatCompletionRequest {
        request(serde_json::json!({
            "model": "claude-haiku-4.5",
            "messages": [{"role": "user", "content": "hi"}]
        }))
    }

    #[test]
    fn single_user_message_becomes_one_text_part() {
        let out = transform_request(&user_hi(), TranslateOptions::default()).unwrap();

        assert_eq!(out.messages.len(), 1);
        let message = &out.messages[0];
        assert_eq!(message.role, SmitheryRole::User);
        assert_eq!(message.parts, vec![SmitheryPart::text("hi")]);
        assert!(message.id.starts_with("msg-"));
        assert_eq!(message.id.len(), "msg-".len() + 16);
        assert!(out.tools.is_empty());
        assert!(!out.stream);
    }

    #[test]
    fn ids_are_fresh_per_translation() {
        let first = transform_request(&user_hi(), TranslateOptions::default()).unwrap();
        let second = transform_request(&user_hi(), TranslateOptions::default()).unwrap();

        assert_ne!(first.messages[0].id, second.messages[0].id);
        assert_eq!(first.messages[0].role, second.messages[0].role);
        assert_eq!(first.messages[0].parts, second.messages[0].parts);
    }

    #[test]
    fn preserves_order_roles_and_stream_flag() {
        let input = request(serde_json::json!({
            "model": "gpt-5",
            "stream": true,
            "messages": [
                {"role": "developer", "content": "rules"},
                {"role": "user", "content": [
                    {"type": "text", "text": "a"},
                    {"type": "text", "text": "b"}
                ]},
                {"role": "assistant", "content": null},
                {"role": "tool", "content": "result", "tool_call_id": "call_1"}
            ]
        }));

        let out = transform_request(&input, TranslateOptions::default()).unwrap();
        let roles: Vec<_> = out.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                SmitheryRole::System,
                SmitheryRole::User,
                SmitheryRole::Assistant,
                SmitheryRole::Tool
            ]
        );
        assert_eq!(out.messages[1].parts, vec![SmitheryPart::text("ab")]);
        assert_eq!(out.messages[2].parts, vec![SmitheryPart::text("")]);
        assert!(out.stream);
    }

    #[test]
    fn image_parts_are_rejected() {
        let input = request(serde_json::json!({
            "model": "gpt-5",
            "messages": [
                {"role": "user", "content": "look"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image_url", "image_url": {"url": "https://example.com/a.png"}}
                ]}
            ]
        }));

        let err = transform_request(&input, TranslateOptions::default()).unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedContent { index: 1, .. }));
    }

    #[test]
    fn assistant_tool_calls_are_rejected() {
        let input = request(serde_json::json!({
            "model": "gpt-5",
            "messages": [{
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "c", "type": "function", "function": {"name": "f", "arguments": "{}"}}]
            }]
        }));

        assert!(matches!(
            transform_request(&input, TranslateOptions::default()),
            Err(TranslateError::UnsupportedContent { index: 0, .. })
        ));
    }

    #[test]
    fn empty_messages_is_invalid() {
        let input = request(serde_json::json!({"model": "gpt-5", "messages": []}));
        assert!(matches!(
            transform_request(&input, TranslateOptions::default()),
            Err(TranslateError::InvalidRequest(_))
        ));
    }

    #[test]
    fn applies_aliases_and_system_prompt() {
        let aliases = ModelAliases::new(BTreeMap::from([(
            "haiku".to_string(),
            "claude-haiku-4.5".to_string(),
        )]));
        let input = request(serde_json::json!({
            "model": "haiku",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let out = transform_request(
            &input,
            TranslateOptions {
                aliases: Some(&aliases),
                system_prompt: Some("You are a helpful assistant."),
            },
        )
        .unwrap();

        assert_eq!(out.model, "claude-haiku-4.5");
        assert_eq!(out.system_prompt.as_deref(), Some("You are a helpful assistant."));
        assert_eq!(aliases.resolve("gpt-5"), "gpt-5");
    }
}
