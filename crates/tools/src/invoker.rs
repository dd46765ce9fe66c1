//! Tool invoker: executes one tool call and normalizes its outcome.
//!
//! Every failure (unknown name, missing configuration, backend error) comes
//! back as a readable tool-result string. Nothing raised by a tool escapes the
//! tool-execution step, so a turn never aborts because a capability failed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use triage_core::error::ToolError;
use triage_core::message::ToolCallRequest;
use triage_core::provider::ToolDefinition;
use triage_core::service::TurnContext;
use triage_core::tool::{Tool, ToolRegistry};

use crate::format::truncate_chars;

/// Appended when the hard character cap cuts a tool result.
pub const TRUNCATION_MARKER: &str = "\n\n... [truncated – use more specific filters]";

/// What one tool call produced, ready to become a tool-result message.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
    pub duration: Duration,
}

/// Executes tool calls against a read-only registry.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    max_chars: usize,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, max_chars: usize) -> Self {
        Self { registry, max_chars }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    /// Schemas to bind on a tool-enabled model call.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Run one requested call. Never fails.
    pub async fn invoke(&self, ctx: &TurnContext, call: &ToolCallRequest) -> ToolOutcome {
        let started = Instant::now();

        let Some(tool) = self.lookup(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return ToolOutcome {
                content: ToolError::Unknown(call.name.clone()).to_string(),
                is_error: true,
                duration: started.elapsed(),
            };
        };

        info!(tool = %call.name, args = %call.args, "Tool called");
        let result = tool.invoke(ctx, call.args.clone()).await;
        let duration = started.elapsed();

        match result {
            Ok(text) => {
                let content = cap_result(text, self.max_chars);
                info!(
                    tool = %call.name,
                    result_length = content.chars().count(),
                    duration_ms = duration.as_millis() as u64,
                    "Tool completed"
                );
                ToolOutcome { content, is_error: false, duration }
            }
            Err(e) => {
                warn!(
                    tool = %call.name,
                    error_code = e.error_code(),
                    service = e.service().unwrap_or("-"),
                    error = %e,
                    "Tool failed"
                );
                ToolOutcome {
                    content: cap_result(e.to_payload(), self.max_chars),
                    is_error: true,
                    duration,
                }
            }
        }
    }
}

/// Cut `text` to exactly `max_chars` characters plus [`TRUNCATION_MARKER`]
/// when it is longer than that.
pub fn cap_result(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut capped = truncate_chars(&text, max_chars).to_string();
    capped.push_str(TRUNCATION_MARKER);
    capped
}
