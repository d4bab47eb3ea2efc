use smithery_protocol::openai::create_chat_completions::response::{
    ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse,
};
use smithery_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;
use smithery_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionResponseMessage, ChatCompletionResponseRole,
    CompletionUsage,
};

/// Folds a single-choice chunk stream into one `chat.completion` object.
#[derive(Debug, Clone)]
pub struct OpenAIChatCompletionStreamToResponseState {
    id: String,
    model: String,
    created: i64,
    content: String,
    finish_reason: Option<ChatCompletionFinishReason>,
    usage: Option<CompletionUsage>,
}

impl OpenAIChatCompletionStreamToResponseState {
    pub fn new() -> Self {
        Self {
            id: "chatcmpl".to_string(),
            model: "unknown".to_string(),
            created: 0,
            content: String::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Returns the finished response once a chunk carries a finish reason.
    pub fn push_chunk(
        &mut self,
        chunk: CreateChatCompletionStreamResponse,
    ) -> Option<CreateChatCompletionResponse> {
        self.id = chunk.id;
        self.model = chunk.model;
        self.created = chunk.created;
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for choice in chunk.choices.into_iter().filter(|choice| choice.index == 0) {
            if let Some(content) = choice.delta.content {
                self.content.push_str(&content);
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        self.finish_reason.map(|_| self.finalize())
    }

    pub fn set_usage(&mut self, usage: CompletionUsage) {
        self.usage = Some(usage);
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    pub fn finalize(&self) -> CreateChatCompletionResponse {
        CreateChatCompletionResponse {
            id: self.id.clone(),
            object: ChatCompletionObjectType::ChatCompletion,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: ChatCompletionResponseRole::Assistant,
                    content: Some(self.content.clone()),
                },
                finish_reason: self
                    .finish_reason
                    .unwrap_or(ChatCompletionFinishReason::Stop),
            }],
            usage: self.usage,
        }
    }
}

impl Default for OpenAIChatCompletionStreamToResponseState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_content::openai_chat_completions2smithery::stream::{
        SmitheryToOpenAIChatCompletionStreamEvent, SmitheryToOpenAIChatCompletionStreamState,
    };

    #[test]
    fn assembles_example_stream() {
        let mut relay =
            SmitheryToOpenAIChatCompletionStreamState::new("chatcmpl-x", "gpt-5", 1_700_000_000);
        let mut events = relay.push_bytes(
            b"data: {\"delta\":\"He\"}\n\ndata: {\"delta\":\"llo\"}\n\ndata: [DONE]\n\n",
        );
        events.extend(relay.finish());

        let mut state = OpenAIChatCompletionStreamToResponseState::new();
        let mut finished = None;
        for event in events {
            if let SmitheryToOpenAIChatCompletionStreamEvent::Chunk(chunk) = event {
                finished = state.push_chunk(chunk).or(finished);
            }
        }
        state.set_usage(CompletionUsage::new(3, 2));
        let response = state.finalize();

        assert!(finished.is_some());
        assert_eq!(response.id, "chatcmpl-x");
        assert_eq!(response.model, "gpt-5");
        assert_eq!(response.created, 1_700_000_000);
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(
            response.choices[0].finish_reason,
            ChatCompletionFinishReason::Stop
        );
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(5));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    }

    #[test]
    fn empty_stream_yields_empty_content() {
        let mut relay = SmitheryToOpenAIChatCompletionStreamState::new("chatcmpl-y", "gpt-5", 0);
        let mut state = OpenAIChatCompletionStreamToResponseState::new();
        for event in relay.finish() {
            if let SmitheryToOpenAIChatCompletionStreamEvent::Chunk(chunk) = event {
                state.push_chunk(chunk);
            }
        }
        assert!(state.is_finished());
        assert_eq!(state.finalize().choices[0].message.content.as_deref(), Some(""));
    }
}
