//! Conversation store backends for Triage.

pub mod in_memory;

pub use in_memory::InMemoryStore;
