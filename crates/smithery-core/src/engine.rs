use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use smithery_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest;
use smithery_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use smithery_protocol::openai::create_chat_completions::types::CompletionUsage;
use smithery_provider_core::{
    ChatProvider, ChatStream, CredentialPool, MetricsSink, ModelGate, ProxyError, ProxyResult,
    RelayOutcome, RequestRecord, RequestStatus, StreamEvent, UpstreamCtx,
};
use smithery_provider_impl::{estimate_prompt_tokens, estimate_text_tokens};
use smithery_transform::stream2nostream::openai_chat_completions::OpenAIChatCompletionStreamToResponseState;

/// One inbound chat request plus what the transport knows about its caller.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub trace_id: String,
    pub request: CreateChatCompletionRequest,
    pub client_ip: Option<String>,
}

/// A streaming reply handed to the transport. Metrics for it are recorded
/// in the background once the relay ends.
#[derive(Debug)]
pub struct ChatSession {
    pub id: String,
    pub model: String,
    pub events: mpsc::Receiver<StreamEvent>,
}

/// Request pipeline: gate, credential rotation, provider, metrics.
#[derive(Clone)]
pub struct ChatEngine {
    pool: Arc<CredentialPool>,
    gate: ModelGate,
    provider: Arc<dyn ChatProvider>,
    metrics: Arc<dyn MetricsSink>,
    retry_next_credential: bool,
}

struct CallMeta {
    trace_id: String,
    model: String,
    client_ip: Option<String>,
    prompt_tokens: i64,
    started_at: OffsetDateTime,
    timer: Instant,
}

impl CallMeta {
    fn start(call: &ChatCall) -> Self {
        Self {
            trace_id: call.trace_id.clone(),
            model: call.request.body.model.clone(),
            client_ip: call.client_ip.clone(),
            prompt_tokens: estimate_prompt_tokens(&call.request.body),
            started_at: OffsetDateTime::now_utc(),
            timer: Instant::now(),
        }
    }
}

type OpenFailure = (ProxyError, Option<usize>);

impl ChatEngine {
    pub fn new(
        pool: Arc<CredentialPool>,
        gate: ModelGate,
        provider: Arc<dyn ChatProvider>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            pool,
            gate,
            provider,
            metrics,
            retry_next_credential: false,
        }
    }

    /// Allows one more attempt on the next credential after the upstream
    /// rejects a session or answers with a challenge.
    pub fn with_retry_next_credential(mut self, enabled: bool) -> Self {
        self.retry_next_credential = enabled;
        self
    }

    pub fn gate(&self) -> &ModelGate {
        &self.gate
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Opens a relayed completion for a streaming client.
    pub async fn stream(&self, call: ChatCall) -> ProxyResult<ChatSession> {
        let meta = CallMeta::start(&call);
        let (stream, credential_index) = self.open(&call, &meta).await?;
        let ChatStream {
            id,
            model,
            events,
            outcome,
        } = stream;

        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = await_outcome(outcome).await;
            engine.record_outcome(&meta, credential_index, &outcome);
        });

        Ok(ChatSession { id, model, events })
    }

    /// Drains the relay and returns a single `chat.completion` object.
    ///
    /// A read failure in the middle of the upstream reply is reported as an
    /// error here; nothing has reached the client yet.
    pub async fn complete(&self, call: ChatCall) -> ProxyResult<CreateChatCompletionResponse> {
        let meta = CallMeta::start(&call);
        let (stream, credential_index) = self.open(&call, &meta).await?;
        let ChatStream {
            mut events,
            outcome,
            ..
        } = stream;

        let mut state = OpenAIChatCompletionStreamToResponseState::new();
        while let Some(event) = events.recv().await {
            if let StreamEvent::Chunk(chunk) = event {
                state.push_chunk(chunk);
            }
        }

        let outcome = await_outcome(outcome).await;
        let completion_tokens = self.record_outcome(&meta, credential_index, &outcome);
        if outcome.status == RequestStatus::Error {
            return Err(ProxyError::UpstreamTransport(
                outcome
                    .error
                    .unwrap_or_else(|| "upstream stream failed".to_string()),
            ));
        }

        state.set_usage(CompletionUsage::new(meta.prompt_tokens, completion_tokens));
        Ok(state.finalize())
    }

    async fn open(&self, call: &ChatCall, meta: &CallMeta) -> ProxyResult<(ChatStream, usize)> {
        match self.try_open(call).await {
            Ok(opened) => Ok(opened),
            Err((err, credential_index)) => {
                self.record_failure(meta, credential_index, &err);
                Err(err)
            }
        }
    }

    async fn try_open(&self, call: &ChatCall) -> Result<(ChatStream, usize), OpenFailure> {
        let body = &call.request.body;
        body.validate()
            .map_err(|reason| (ProxyError::InvalidRequest(reason.to_string()), None))?;
        self.gate.check(&body.model).map_err(|err| (err, None))?;

        let max_attempts = if self.retry_next_credential && self.pool.len() > 1 {
            2
        } else {
            1
        };
        let mut attempt_no = 1;
        loop {
            let (credential_index, credential) = self.pool.next().map_err(|err| (err, None))?;
            debug!(
                event = "credential_selected",
                trace_id = %call.trace_id,
                credential_index = credential_index,
                attempt_no = attempt_no
            );
            let ctx = UpstreamCtx {
                trace_id: call.trace_id.clone(),
                credential_index,
                attempt_no,
            };
            match self
                .provider
                .open_chat(&ctx, &call.request, &credential)
                .await
            {
                Ok(stream) => return Ok((stream, credential_index)),
                Err(err) if err.is_credential_failure() && attempt_no < max_attempts => {
                    warn!(
                        event = "credential_failed",
                        trace_id = %call.trace_id,
                        credential_index = credential_index,
                        attempt_no = attempt_no,
                        error = %err
                    );
                    attempt_no += 1;
                }
                Err(err) => return Err((err, Some(credential_index))),
            }
        }
    }

    fn record_failure(&self, meta: &CallMeta, credential_index: Option<usize>, err: &ProxyError) {
        self.record(meta, credential_index, RequestStatus::Error, 0, Some(err.message()));
    }

    /// Records a finished relay and returns the completion token estimate.
    fn record_outcome(&self, meta: &CallMeta, credential_index: usize, outcome: &RelayOutcome) -> i64 {
        let completion_tokens = estimate_text_tokens(&outcome.completion_text, &meta.model);
        self.record(
            meta,
            Some(credential_index),
            outcome.status,
            completion_tokens,
            outcome.error.clone(),
        );
        completion_tokens
    }

    fn record(
        &self,
        meta: &CallMeta,
        credential_index: Option<usize>,
        status: RequestStatus,
        completion_tokens: i64,
        error_message: Option<String>,
    ) {
        let duration_ms = meta.timer.elapsed().as_secs_f64() * 1000.0;
        info!(
            event = "chat_finished",
            trace_id = %meta.trace_id,
            model = %meta.model,
            credential_index = ?credential_index,
            status = ?status,
            prompt_tokens = meta.prompt_tokens,
            completion_tokens = completion_tokens,
            elapsed_ms = duration_ms as u64
        );
        self.metrics.record(RequestRecord {
            id: meta.trace_id.clone(),
            model: meta.model.clone(),
            prompt_tokens: meta.prompt_tokens,
            completion_tokens,
            total_tokens: meta.prompt_tokens + completion_tokens,
            started_at: meta.started_at,
            completed_at: OffsetDateTime::now_utc(),
            duration_ms,
            status,
            error_message,
            token_index: credential_index,
            client_ip: meta.client_ip.clone(),
        });
    }
}

async fn await_outcome(outcome: oneshot::Receiver<RelayOutcome>) -> RelayOutcome {
    outcome.await.unwrap_or_else(|_| RelayOutcome {
        status: RequestStatus::Error,
        completion_text: String::new(),
        error: Some("relay ended without reporting an outcome".to_string()),
    })
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("provider", &self.provider.name())
            .field("credentials", &self.pool.len())
            .field("retry_next_credential", &self.retry_next_credential)
            .finish_non_exhaustive()
    }
}
