//! # Triage Core
//!
//! Domain types, traits, and error definitions for the Triage investigation agent.
//! This crate has **no framework dependencies**: it defines the domain model
//! that the provider, tool, store, and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates, so the turn controller can be exercised against scripted
//! providers and mock backends without any network.

pub mod error;
pub mod message;
pub mod organization;
pub mod provider;
pub mod service;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use message::{Content, ContentBlock, Message, Role, ToolCallRequest};
pub use organization::{ModelOverrides, Organization, ServiceMapping};
pub use provider::{ModelRequest, ModelResponse, ModelSettings, Provider, StreamChunk, ToolDefinition, Usage};
pub use service::{Service, ServiceBackend, TurnContext};
pub use store::{CompactionRecord, ConversationRecord, ConversationStore, StoredMessage};
pub use tool::{Tool, ToolRegistry};
