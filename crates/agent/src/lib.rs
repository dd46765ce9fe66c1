//! The guardrailed turn loop of Triage.
//!
//! A turn alternates between model calls and the tool calls they request:
//!
//! 1. **Compact** the conversation's prior history ([`HistoryCompactor`])
//! 2. **Call the model**, with tools bound unless a guardrail forces synthesis
//! 3. **Execute tools** one at a time, folding failures into tool results
//! 4. **Loop** until the model stops requesting tools or the budget runs out
//! 5. **Publish** every step as a [`TurnEvent`], ending in exactly one
//!    `done` or `error`
//!
//! [`ChatService`] wraps a turn with loading, titling, and persistence.

pub mod compactor;
pub mod controller;
pub mod guardrail;
pub mod prompt;
pub mod publisher;
pub mod session;
pub mod stream_event;
pub mod token;
pub mod turn;

pub use compactor::{CompactedHistory, HistoryCompactor};
pub use controller::{TurnController, TurnOutcome, TurnState};
pub use guardrail::{CallMode, SynthesisReason};
pub use prompt::UserContext;
pub use publisher::Publisher;
pub use session::{ChatService, SendMessage, SessionError};
pub use stream_event::{ToolRecord, TurnEvent, TurnStats, TurnTrace};
pub use token::estimate_tokens;
pub use turn::{ContextBuilder, TurnRequest, TurnRunner};
