//! Turn-level streaming events.
//!
//! `TurnEvent` is the neutral event union a turn publishes. The gateway
//! forwards each one as an SSE event named by [`TurnEvent::event_type`]; the
//! CLI renders them directly.
//!
//! Per turn: `stats` before each model call, `token`s while a model call
//! streams text, a `tool_start`/`tool_end` pair per dispatched tool call, a
//! final `stats` with `final = true`, exactly one `done` or `error`, then an
//! optional `trace`.

use serde::{Deserialize, Serialize};

/// Running guardrail metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnStats {
    pub ai_calls: u32,
    pub max_ai_calls: u32,
    pub tool_calls: u32,
    pub elapsed_seconds: f64,
    pub estimated_tokens: usize,
    pub max_tokens: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub r#final: bool,
}

/// One dispatched tool call, as recorded for the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub tool_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// The complete call/response/tool history of one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnTrace {
    pub full_trace: Vec<serde_json::Value>,
    pub tool_calls: Vec<ToolRecord>,
    pub tool_responses: Vec<ToolRecord>,
    pub final_response: String,
    pub stats: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Guardrail metrics, before each model call and once at the end.
    Stats(TurnStats),

    /// Incremental text from a streaming model call.
    Token { content: String },

    /// A tool call is being dispatched.
    ToolStart {
        tool: String,
        args: serde_json::Value,
        id: String,
        tool_number: u32,
        ai_call: u32,
    },

    /// The matching tool call finished.
    ToolEnd {
        tool: String,
        id: String,
        result_preview: String,
        result_length: usize,
        duration_ms: u64,
        is_error: bool,
    },

    /// Terminal: the final answer.
    Done { content: String },

    /// Terminal: the turn aborted.
    Error { error: String },

    /// Full debug trace, after the terminal event when requested.
    Trace(TurnTrace),
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Stats(_) => "stats",
            Self::Token { .. } => "token",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
            Self::Trace(_) => "trace",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
