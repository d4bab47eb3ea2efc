mod classify;
mod headers;

pub use classify::{
    classify_failure, classify_non_stream_success, is_challenge, is_challenge_headers,
};
pub use headers::browser_headers;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use smithery_common::GlobalConfig;
use smithery_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest;
use smithery_provider_core::{
    ChatProvider, ChatStream, Credential, ProxyError, ProxyResult, UpstreamBody, UpstreamCtx,
    UpstreamHttpRequest, content_type_is,
};
use smithery_transform::generate_content::openai_chat_completions2smithery::request::{
    ModelAliases, TranslateOptions, transform_request,
};
use smithery_transform::generate_content::openai_chat_completions2smithery::stream::SmitheryToOpenAIChatCompletionStreamState;

use crate::client::UpstreamClient;
use crate::relay::spawn_relay;
use crate::upstream::send_with_logging;

const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;
const EVENT_STREAM: &str = "text/event-stream";

#[derive(Debug, Clone)]
pub struct SmitheryProviderConfig {
    pub upstream_url: String,
    pub aliases: ModelAliases,
    pub system_prompt: Option<String>,
}

impl SmitheryProviderConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            upstream_url: global.upstream_url.clone(),
            aliases: ModelAliases::new(global.model_aliases.clone()),
            system_prompt: global.system_prompt.clone(),
        }
    }
}

/// The Smithery playground chat endpoint.
pub struct SmitheryProvider {
    client: Arc<dyn UpstreamClient>,
    config: SmitheryProviderConfig,
}

impl SmitheryProvider {
    pub fn new(client: Arc<dyn UpstreamClient>, config: SmitheryProviderConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChatProvider for SmitheryProvider {
    fn name(&self) -> &'static str {
        "smithery"
    }

    async fn open_chat(
        &self,
        ctx: &UpstreamCtx,
        request: &CreateChatCompletionRequest,
        credential: &Credential,
    ) -> ProxyResult<ChatStream> {
        let body = transform_request(
            request,
            TranslateOptions {
                aliases: Some(&self.config.aliases),
                system_prompt: self.config.system_prompt.as_deref(),
            },
        )?;
        let payload =
            serde_json::to_vec(&body).map_err(|err| ProxyError::Internal(err.to_string()))?;
        let upstream_request = UpstreamHttpRequest {
            url: self.config.upstream_url.clone(),
            headers: browser_headers(credential),
            body: Bytes::from(payload),
        };

        let response = send_with_logging(ctx, self.name(), &body.model, body.stream, || {
            self.client.send(upstream_request)
        })
        .await?;

        if !(200..300).contains(&response.status) {
            let raw = collect_body(response.body).await;
            return Err(classify_failure(
                response.status,
                &response.headers,
                &raw,
                ctx.credential_index,
                &credential.name,
            ));
        }
        if is_challenge_headers(&response.headers)
            || !content_type_is(&response.headers, EVENT_STREAM)
        {
            let raw = collect_body(response.body).await;
            return Err(classify_non_stream_success(
                response.status,
                &response.headers,
                &raw,
                ctx.credential_index,
            ));
        }

        let state = SmitheryToOpenAIChatCompletionStreamState::for_model(&request.body.model);
        Ok(spawn_relay(ctx.trace_id.clone(), response.body, state))
    }
}

async fn collect_body(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut buf = BytesMut::new();
            while let Some(Ok(chunk)) = rx.recv().await {
                buf.extend_from_slice(&chunk);
                if buf.len() >= MAX_ERROR_BODY_BYTES {
                    break;
                }
            }
            buf.freeze()
        }
    }
}
