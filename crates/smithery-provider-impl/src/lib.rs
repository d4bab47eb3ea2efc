//! The Smithery upstream: browser-emulating HTTP client, provider and the
//! async relay that turns its event stream into OpenAI chunks.

pub mod client;
pub mod relay;
pub mod smithery;
pub mod tokens;
pub mod upstream;

pub use client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
pub use smithery::{SmitheryProvider, SmitheryProviderConfig};
pub use tokens::{estimate_prompt_tokens, estimate_text_tokens};
