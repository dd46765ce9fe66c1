//! Anthropic-protocol provider.
//!
//! Speaks two wire flavours over the same message shape:
//! - `Messages`: Anthropic's Messages API, `x-api-key` auth, SSE streaming
//! - `BedrockProxy`: a Bedrock invoke proxy, Bearer auth, single-shot responses
//!
//! Shared behaviour:
//! - System prompt (plus any system-role messages) as a top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Per-call overrides for key, base URL, model and max tokens

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use triage_config::{ApiFlavor, ModelConfig};
use triage_core::error::ProviderError;
use triage_core::message::{Message, Role, ToolCallRequest};
use triage_core::provider::*;

use crate::key::resolve_api_key;
use crate::sse::SseDecoder;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Anthropic-protocol model provider.
pub struct AnthropicProvider {
    name: String,
    flavor: ApiFlavor,
    base_url: String,
    api_key: Option<String>,
    api_key_helper: Option<PathBuf>,
    model_id: String,
    max_tokens: u32,
    client: reqwest::Client,
}

/// Everything needed to send one request, after overrides are applied.
struct PreparedCall {
    url: String,
    model_id: String,
    body: serde_json::Value,
    api_key: String,
}

impl AnthropicProvider {
    /// Create a provider from the global model configuration.
    pub fn new(config: &ModelConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: match config.flavor {
                ApiFlavor::Messages => "anthropic".into(),
                ApiFlavor::BedrockProxy => "bedrock-proxy".into(),
            },
            flavor: config.flavor,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_key_helper: config.api_key_helper.clone(),
            model_id: config.model_id.clone(),
            max_tokens: config.max_tokens,
            client,
        })
    }

    /// Override the base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Split system content from the conversation.
    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system<'a>(system_prompt: &str, messages: &'a [Message]) -> (Option<String>, Vec<&'a Message>) {
        let mut system_parts: Vec<String> = Vec::new();
        if !system_prompt.trim().is_empty() {
            system_parts.push(system_prompt.to_string());
        }
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(msg.text()),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.text()),
                    });
                }
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Text(msg.text()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        let text = msg.text();
                        if !text.is_empty() {
                            blocks.push(ContentBlock::Text { text });
                        }
                        for tc in &msg.tool_calls {
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input: tc.args.clone(),
                            });
                        }
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(vec![ContentBlock::ToolResult {
                            tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                            content: msg.text(),
                            is_error: msg.is_error,
                        }]),
                    });
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &ModelRequest, model_id: &str, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.system_prompt, &request.messages);
        let max_tokens = request.settings.max_tokens.unwrap_or(self.max_tokens);

        let mut body = serde_json::json!({
            "max_tokens": max_tokens,
            "temperature": request.temperature,
            "messages": Self::to_api_messages(&messages),
        });

        match self.flavor {
            ApiFlavor::Messages => {
                body["model"] = serde_json::json!(model_id);
                if stream {
                    body["stream"] = serde_json::json!(true);
                }
            }
            ApiFlavor::BedrockProxy => {
                body["anthropic_version"] = serde_json::json!(BEDROCK_ANTHROPIC_VERSION);
            }
        }

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = serde_json::json!(Self::to_api_tools(tools));
        }

        body
    }

    async fn prepare(&self, request: &ModelRequest, stream: bool) -> Result<PreparedCall, ProviderError> {
        let settings = &request.settings;
        let api_key = resolve_api_key(
            settings.api_key.as_deref(),
            self.api_key.as_deref(),
            self.api_key_helper.as_deref(),
        )
        .await?;

        let base_url = settings
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        let model_id = settings.model_id.clone().unwrap_or_else(|| self.model_id.clone());

        let url = match self.flavor {
            ApiFlavor::Messages => format!("{base_url}/v1/messages"),
            ApiFlavor::BedrockProxy => format!("{base_url}/bedrock/model/{model_id}/invoke"),
        };

        let body = self.build_body(request, &model_id, stream);
        Ok(PreparedCall { url, model_id, body, api_key })
    }

    async fn send(&self, call: &PreparedCall, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(&call.url)
            .header("Content-Type", "application/json");

        builder = match self.flavor {
            ApiFlavor::Messages => builder
                .header("x-api-key", &call.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ApiFlavor::BedrockProxy => builder.bearer_auth(&call.api_key),
        };
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(&call.body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after(&response).unwrap_or(5),
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(format!(
                "{} rejected the API key (status {status})",
                self.name
            )));
        }
        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Model API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    /// Convert an Anthropic API response to our ModelResponse.
    fn to_model_response(resp: AnthropicResponse, fallback_model: &str) -> ModelResponse {
        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => text_parts.push(text),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCallRequest::new(id, name, input));
                }
                ResponseContentBlock::Other => {}
            }
        }

        let mut message = Message::assistant_with_tool_calls(text_parts.join("\n"), tool_calls);
        if let Some(id) = resp.id {
            message.id = id;
        }

        ModelResponse {
            message,
            stop_reason: Some(resp.stop_reason.unwrap_or_else(|| "end_turn".into())),
            usage: resp.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            model: resp.model.unwrap_or_else(|| fallback_model.to_string()),
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl triage_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError> {
        let call = self.prepare(&request, false).await?;

        info!(
            provider = %self.name,
            model = %call.model_id,
            msg_count = request.messages.len(),
            has_tools = request.tools_bound(),
            "Sending completion request"
        );

        let response = self.send(&call, false).await?;
        let api_resp: AnthropicResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse model response: {e}"),
        })?;

        Ok(Self::to_model_response(api_resp, &call.model_id))
    }

    async fn stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        if self.flavor == ApiFlavor::BedrockProxy {
            // The invoke proxy has no streaming endpoint.
            let response = self.complete(request).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let text = response.message.text();
            let _ = tx
                .send(Ok(StreamChunk {
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: response.message.tool_calls,
                    done: true,
                    stop_reason: response.stop_reason,
                    usage: response.usage,
                }))
                .await;
            return Ok(rx);
        }

        let call = self.prepare(&request, true).await?;
        debug!(
            provider = %self.name,
            model = %call.model_id,
            has_tools = request.tools_bound(),
            "Sending streaming request"
        );
        let response = self.send(&call, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                match decoder.feed(&bytes) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }

                if decoder.is_finished() {
                    return;
                }
            }

            // Stream ended without message_stop
            if let Some(last) = decoder.finish() {
                let _ = tx.send(Ok(last)).await;
            }
        });

        Ok(rx)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
