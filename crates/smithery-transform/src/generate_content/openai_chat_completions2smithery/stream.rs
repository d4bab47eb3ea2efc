use smithery_protocol::openai::create_chat_completions::stream::{
    ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse,
};
use smithery_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionResponseRole, ChatCompletionStreamResponseDelta,
};
use smithery_protocol::smithery::stream::SmitheryStreamEvent;
use smithery_protocol::sse::{DONE_SENTINEL, DataLineDecoder};
use uuid::Uuid;

/// Output of the relay, in the order it must reach the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SmitheryToOpenAIChatCompletionStreamEvent {
    Chunk(CreateChatCompletionStreamResponse),
    /// Emitted once, right after the terminal chunk.
    Done,
}

impl SmitheryToOpenAIChatCompletionStreamEvent {
    pub fn as_chunk(&self) -> Option<&CreateChatCompletionStreamResponse> {
        match self {
            SmitheryToOpenAIChatCompletionStreamEvent::Chunk(chunk) => Some(chunk),
            SmitheryToOpenAIChatCompletionStreamEvent::Done => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayPhase {
    Open,
    Terminal,
}

/// Rebuilds OpenAI chunks from the playground event stream.
///
/// Bytes go in through `push_bytes` as they arrive; the caller ends the
/// stream with `finish` (clean EOF) or `abort` (read failure). Whatever the
/// path, exactly one terminal chunk is produced and nothing follows it.
#[derive(Debug)]
pub struct SmitheryToOpenAIChatCompletionStreamState {
    id: String,
    model: String,
    created: i64,
    decoder: DataLineDecoder,
    phase: RelayPhase,
    role_emitted: bool,
    skipped_events: usize,
}

impl SmitheryToOpenAIChatCompletionStreamState {
    pub fn new(id: impl Into<String>, model: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created,
            decoder: DataLineDecoder::new(),
            phase: RelayPhase::Open,
            role_emitted: false,
            skipped_events: 0,
        }
    }

    /// A relay with a fresh `chatcmpl-` id stamped with the current time.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self::new(
            new_completion_id(),
            model,
            time::OffsetDateTime::now_utc().unix_timestamp(),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == RelayPhase::Terminal
    }

    /// Malformed events plus lines dropped for exceeding the length limit.
    pub fn skipped_events(&self) -> usize {
        self.skipped_events + self.decoder.dropped_lines()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<SmitheryToOpenAIChatCompletionStreamEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for payload in self.decoder.push_bytes(bytes) {
            self.handle_payload(&payload, &mut out);
            if self.is_terminal() {
                break;
            }
        }
        out
    }

    /// Upstream closed the connection. Flushes a final unterminated line and
    /// closes the stream if `[DONE]` never arrived.
    pub fn finish(&mut self) -> Vec<SmitheryToOpenAIChatCompletionStreamEvent> {
        let mut out = Vec::new();
        if self.is_terminal() {
            return out;
        }
        if let Some(payload) = self.decoder.finish() {
            self.handle_payload(&payload, &mut out);
        }
        if !self.is_terminal() {
            self.terminate(&mut out);
        }
        out
    }

    /// Upstream failed mid-stream. Pending partial input is discarded.
    pub fn abort(&mut self) -> Vec<SmitheryToOpenAIChatCompletionStreamEvent> {
        let mut out = Vec::new();
        if !self.is_terminal() {
            self.terminate(&mut out);
        }
        out
    }

    fn handle_payload(
        &mut self,
        payload: &str,
        out: &mut Vec<SmitheryToOpenAIChatCompletionStreamEvent>,
    ) {
        if payload == DONE_SENTINEL {
            self.terminate(out);
            return;
        }

        let event = match serde_json::from_str::<SmitheryStreamEvent>(payload) {
            Ok(event) => event,
            Err(err) => {
                self.skipped_events += 1;
                tracing::warn!(
                    event = "relay_event_skipped",
                    completion_id = %self.id,
                    error = %err,
                    payload_len = payload.len(),
                );
                return;
            }
        };

        if let Some(text) = event.text_delta() {
            let chunk = self.chunk(Some(text), None);
            out.push(SmitheryToOpenAIChatCompletionStreamEvent::Chunk(chunk));
        }
    }

    fn terminate(&mut self, out: &mut Vec<SmitheryToOpenAIChatCompletionStreamEvent>) {
        let chunk = self.chunk(Some(String::new()), Some(ChatCompletionFinishReason::Stop));
        out.push(SmitheryToOpenAIChatCompletionStreamEvent::Chunk(chunk));
        out.push(SmitheryToOpenAIChatCompletionStreamEvent::Done);
        self.phase = RelayPhase::Terminal;
    }

    fn chunk(
        &mut self,
        content: Option<String>,
        finish_reason: Option<ChatCompletionFinishReason>,
    ) -> CreateChatCompletionStreamResponse {
        let role = if self.role_emitted {
            None
        } else {
            self.role_emitted = true;
            Some(ChatCompletionResponseRole::Assistant)
        };

        CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta: ChatCompletionStreamResponseDelta { role, content },
                finish_reason,
            }],
            usage: None,
        }
    }
}

pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}
