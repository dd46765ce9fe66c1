//! Anthropic server-sent event decoding.
//!
//! Translates the raw Messages API event protocol (`message_start`,
//! `content_block_start/delta/stop`, `message_delta`, `message_stop`) into
//! neutral [`StreamChunk`]s. Text deltas are forwarded as they arrive; tool
//! calls are buffered until their block closes and surface on the final chunk.

use triage_core::error::ProviderError;
use triage_core::message::ToolCallRequest;
use triage_core::provider::{StreamChunk, Usage};
use tracing::trace;

#[derive(Default)]
struct PendingToolUse {
    id: String,
    name: String,
    json: String,
}

impl PendingToolUse {
    fn finish(self) -> ToolCallRequest {
        let args = if self.json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.json).unwrap_or_else(|e| {
                trace!(error = %e, tool = %self.name, "Unparseable tool input, passing raw string");
                serde_json::Value::String(self.json.clone())
            })
        };
        ToolCallRequest::new(self.id, self.name, args)
    }
}

/// Incremental decoder. Feed it raw bytes as they arrive off the wire.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: Option<PendingToolUse>,
    tool_calls: Vec<ToolCallRequest>,
    stop_reason: Option<String>,
    usage: Usage,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume a slice of the byte stream, returning any chunks it completes.
    ///
    /// Only complete lines are decoded, so a multi-byte character split
    /// across two reads survives intact.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamChunk>, ProviderError> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            if self.finished || line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                    continue;
                }
            };

            if let Some(chunk) = self.handle_event(&event)? {
                out.push(chunk);
            }
        }

        Ok(out)
    }

    fn handle_event(&mut self, event: &serde_json::Value) -> Result<Option<StreamChunk>, ProviderError> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(input) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.usage.input_tokens = input as u32;
                }
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.close_pending();
                    self.pending = Some(PendingToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        json: String::new(),
                    });
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                            return Ok(Some(StreamChunk {
                                content: Some(text.to_string()),
                                ..Default::default()
                            }));
                        }
                    }
                    "input_json_delta" => {
                        if let (Some(pending), Some(partial)) = (self.pending.as_mut(), delta["partial_json"].as_str()) {
                            pending.json.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => self.close_pending(),
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output as u32;
                }
            }
            "message_stop" => {
                self.finished = true;
                return Ok(Some(self.final_chunk()));
            }
            "error" => {
                let message = event["error"]["message"].as_str().unwrap_or("unknown stream error");
                return Err(ProviderError::StreamInterrupted(message.to_string()));
            }
            _ => {}
        }
        Ok(None)
    }

    fn close_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.tool_calls.push(pending.finish());
        }
    }

    fn final_chunk(&mut self) -> StreamChunk {
        self.close_pending();
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls),
            done: true,
            stop_reason: self.stop_reason.take(),
            usage: Some(self.usage.clone()),
        }
    }

    /// Close the stream when the connection ends without `message_stop`.
    pub fn finish(mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.final_chunk())
    }
}
