//! Wire types for both sides of the proxy.
//!
//! `openai` is the downstream chat-completions dialect clients speak,
//! `smithery` is the upstream playground chat schema, and `sse` holds the
//! line-level framing shared by both streams.

pub mod openai;
pub mod smithery;
pub mod sse;
