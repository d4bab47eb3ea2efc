//! Core abstractions shared by the proxy layers.
//!
//! Nothing here performs IO. Concrete upstream clients live in
//! `smithery-provider-impl`; this crate only defines what they hand back.

pub mod credential;
pub mod errors;
pub mod headers;
pub mod metrics;
pub mod model_gate;
pub mod provider;

pub use credential::{Credential, CredentialPool, mask_email};
pub use errors::{MODEL_BLOCKED_MESSAGE, ProxyError, ProxyResult};
pub use headers::{Headers, content_type_is, header_get, header_set};
pub use metrics::{MetricsSink, NoopMetricsSink, RequestRecord, RequestStatus};
pub use model_gate::{ModelGate, ModelVisibility};
pub use provider::{
    ByteStream, ChatProvider, ChatStream, RelayOutcome, UpstreamBody, UpstreamCtx,
    UpstreamHttpRequest, UpstreamHttpResponse,
};

pub use smithery_transform::generate_content::openai_chat_completions2smithery::stream::SmitheryToOpenAIChatCompletionStreamEvent as StreamEvent;
