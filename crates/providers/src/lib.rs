//! Model provider implementations for Triage.
//!
//! All providers implement the `triage_core::Provider` trait.

pub mod anthropic;
pub mod key;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use key::resolve_api_key;
pub use sse::SseDecoder;
