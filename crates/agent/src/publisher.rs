//! Event stream publisher.
//!
//! Maps the controller's transitions onto the ordered [`TurnEvent`] sequence,
//! keeps the running counters reported in `stats`, and picks the final text.

use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use triage_config::GuardrailConfig;
use triage_core::error::Error;
use triage_core::message::{Message, Role, ToolCallRequest};
use triage_core::provider::Usage;
use triage_tools::ToolOutcome;
use triage_tools::format::truncate_chars;

use crate::controller::TurnOutcome;
use crate::stream_event::{ToolRecord, TurnEvent, TurnStats, TurnTrace};

/// Used when a turn produced no text at all.
pub const APOLOGY: &str = "I was unable to generate a response. Please try again.";

/// Appended to partial text when the user stopped the turn.
pub const STOPPED_SUFFIX: &str =
    "\n\n---\n*Investigation stopped by user. Above is a partial summary based on data collected so far.*";

/// Sent when the user stopped the turn before any text was produced.
pub const STOPPED_EMPTY: &str = "Investigation stopped by user before any results were collected.";

/// Characters of a tool result carried in `tool_end`.
pub const RESULT_PREVIEW_CHARS: usize = 2000;

const CONTENT_PREVIEW_CHARS: usize = 200;

pub struct Publisher {
    tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
    started: Instant,
    max_ai_calls: u32,
    max_tokens: usize,

    ai_calls: u32,
    tool_calls: u32,
    estimated_tokens: usize,
    /// Text of the last model completion that had any
    last_model_text: Option<String>,

    capture_trace: bool,
    trace: TurnTrace,
    open_tool: Option<(ToolRecord, Instant)>,
}

impl Publisher {
    pub fn new(
        tx: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
        guardrails: &GuardrailConfig,
        capture_trace: bool,
    ) -> Self {
        Self {
            tx,
            cancel,
            started: Instant::now(),
            max_ai_calls: guardrails.max_ai_calls,
            max_tokens: guardrails.max_input_tokens,
            ai_calls: 0,
            tool_calls: 0,
            estimated_tokens: 0,
            last_model_text: None,
            capture_trace,
            trace: TurnTrace::default(),
            open_tool: None,
        }
    }

    /// A dropped receiver means nobody is listening; stop the turn cooperatively.
    async fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).await.is_err() && !self.cancel.is_cancelled() {
            debug!("Event receiver dropped, cancelling turn");
            self.cancel.cancel();
        }
    }

    fn elapsed_seconds(&self) -> f64 {
        (self.started.elapsed().as_secs_f64() * 10.0).round() / 10.0
    }

    pub fn stats(&self, is_final: bool) -> TurnStats {
        TurnStats {
            ai_calls: self.ai_calls,
            max_ai_calls: self.max_ai_calls,
            tool_calls: self.tool_calls,
            elapsed_seconds: self.elapsed_seconds(),
            estimated_tokens: self.estimated_tokens,
            max_tokens: self.max_tokens,
            r#final: is_final,
        }
    }

    pub async fn model_started(&mut self, ai_call: u32, estimated_tokens: usize) {
        self.ai_calls = ai_call;
        self.estimated_tokens = estimated_tokens;
        if self.capture_trace {
            self.trace.full_trace.push(json!({
                "type": "ai_invoke",
                "ai_call_number": ai_call,
                "elapsed_seconds": self.elapsed_seconds(),
            }));
        }
        self.emit(TurnEvent::Stats(self.stats(false))).await;
    }

    pub async fn token(&mut self, text: &str) {
        if !text.is_empty() {
            self.emit(TurnEvent::Token { content: text.to_string() }).await;
        }
    }

    pub fn model_finished(&mut self, response: &Message, usage: Option<&Usage>) {
        let text = response.text();
        if self.capture_trace {
            let calls: Vec<_> = response
                .tool_calls
                .iter()
                .map(|c| json!({"id": c.id, "name": c.name, "args": c.args}))
                .collect();
            self.trace.full_trace.push(json!({
                "type": "ai_response",
                "ai_call_number": self.ai_calls,
                "content_preview": truncate_chars(&text, CONTENT_PREVIEW_CHARS),
                "tool_calls": calls,
                "usage": usage,
            }));
        }
        if !text.is_empty() {
            self.last_model_text = Some(text);
        }
    }

    pub async fn tool_started(&mut self, call: &ToolCallRequest) {
        self.tool_calls += 1;
        let record = ToolRecord {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.args.clone(),
            tool_number: self.tool_calls,
            output: None,
            duration_ms: None,
        };
        if self.capture_trace {
            self.trace.full_trace.push(json!({
                "type": "tool_call",
                "tool": call.name,
                "input": call.args,
                "tool_number": self.tool_calls,
            }));
            self.trace.tool_calls.push(record.clone());
        }
        self.open_tool = Some((record, Instant::now()));

        self.emit(TurnEvent::ToolStart {
            tool: call.name.clone(),
            args: call.args.clone(),
            id: call.id.clone(),
            tool_number: self.tool_calls,
            ai_call: self.ai_calls,
        })
        .await;
    }

    pub async fn tool_finished(&mut self, call: &ToolCallRequest, outcome: &ToolOutcome) {
        let duration_ms = outcome.duration.as_millis() as u64;
        let result_length = outcome.content.chars().count();
        let preview = truncate_chars(&outcome.content, RESULT_PREVIEW_CHARS).to_string();

        if let Some((mut record, _)) = self.open_tool.take().filter(|(r, _)| r.id == call.id) {
            if self.capture_trace {
                record.output = Some(outcome.content.clone());
                record.duration_ms = Some(duration_ms);
                self.trace.tool_responses.push(record);
            }
        }
        if self.capture_trace {
            self.trace.full_trace.push(json!({
                "type": "tool_response",
                "tool": call.name,
                "output_preview": preview,
                "output_length": result_length,
                "duration_ms": duration_ms,
            }));
        }

        self.emit(TurnEvent::ToolEnd {
            tool: call.name.clone(),
            id: call.id.clone(),
            result_preview: preview,
            result_length,
            duration_ms,
            is_error: outcome.is_error,
        })
        .await;
    }

    /// Pick the text a finished turn reports.
    ///
    /// The last observed model completion wins, then the last assistant text
    /// in the final state, then the apology. A stopped turn keeps whatever
    /// partial text exists and says it was stopped.
    pub fn final_text(&self, final_state: &[Message], stopped: bool) -> String {
        let from_state = || {
            final_state
                .last()
                .filter(|m| m.role == Role::Assistant)
                .map(Message::text)
                .filter(|t| !t.is_empty())
        };
        let text = self.last_model_text.clone().or_else(from_state);

        if stopped {
            return match text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                Some(partial) => format!("{partial}{STOPPED_SUFFIX}"),
                None => STOPPED_EMPTY.to_string(),
            };
        }
        text.unwrap_or_else(|| APOLOGY.to_string())
    }

    /// Emit the final stats, the terminal event, and the trace if requested.
    pub async fn finish(mut self, result: Result<TurnOutcome, Error>, final_state: &[Message]) {
        let final_stats = self.stats(true);
        self.emit(TurnEvent::Stats(final_stats.clone())).await;

        let final_response = match result {
            Ok(outcome) => {
                let stopped = outcome == TurnOutcome::Cancelled;
                let content = self.final_text(final_state, stopped);
                info!(
                    ai_calls = final_stats.ai_calls,
                    tool_calls = final_stats.tool_calls,
                    elapsed_seconds = final_stats.elapsed_seconds,
                    stopped,
                    content_len = content.chars().count(),
                    "Turn finished"
                );
                self.emit(TurnEvent::Done { content: content.clone() }).await;
                content
            }
            Err(e) => {
                error!(ai_calls = final_stats.ai_calls, error = %e, "Turn failed");
                self.emit(TurnEvent::Error { error: format!("Agent error: {e}") }).await;
                String::new()
            }
        };

        if self.capture_trace {
            let mut trace = std::mem::take(&mut self.trace);
            trace.final_response = final_response;
            trace.stats = json!({
                "ai_calls": final_stats.ai_calls,
                "tool_calls": final_stats.tool_calls,
                "elapsed_seconds": final_stats.elapsed_seconds,
            });
            self.emit(TurnEvent::Trace(trace)).await;
        }
    }
}
