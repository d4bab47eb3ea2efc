use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use smithery_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest;

use crate::credential::Credential;
use crate::errors::{ProxyError, ProxyResult};
use crate::headers::Headers;
use crate::metrics::RequestStatus;
use crate::StreamEvent;

/// Upstream body chunks. An `Err` item ends the stream (read failure or
/// idle timeout).
pub type ByteStream = mpsc::Receiver<Result<Bytes, ProxyError>>;

/// A `POST` to the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
}

/// Raw upstream body: fully buffered, or forwarded chunk by chunk.
#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

/// Per-attempt context handed to a provider.
#[derive(Debug, Clone)]
pub struct UpstreamCtx {
    pub trace_id: String,
    pub credential_index: usize,
    pub attempt_no: u32,
}

/// How a relayed stream ended, reported once the relay task exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub status: RequestStatus,
    pub completion_text: String,
    pub error: Option<String>,
}

/// A live completion: relay events in delivery order plus the final outcome.
///
/// Dropping `events` cancels the relay and closes the upstream connection.
#[derive(Debug)]
pub struct ChatStream {
    pub id: String,
    pub model: String,
    pub events: mpsc::Receiver<StreamEvent>,
    pub outcome: oneshot::Receiver<RelayOutcome>,
}

/// An upstream that can serve OpenAI chat completions.
///
/// Errors returned here happened before any chunk existed; failures after
/// that point end the stream with a terminal chunk instead.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open_chat(
        &self,
        ctx: &UpstreamCtx,
        request: &CreateChatCompletionRequest,
        credential: &Credential,
    ) -> ProxyResult<ChatStream>;
}
