//! Provider trait: the abstraction over the language model backend.
//!
//! A Provider is a pure `respond(settings, messages, tools | none)` function:
//! every request carries everything needed to make the call, including the
//! per-organization overrides. Tool binding never mutates provider state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};

/// Per-call model settings. Each `None` means "use the provider's global default".
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// Maximum output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// A single model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Main system prompt. System-role messages in `messages` are appended to it.
    pub system_prompt: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Tool schemas to bind. `None` means the model cannot request tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(default)]
    pub settings: ModelSettings,

    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,
}

impl ModelRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            tools: None,
            settings: ModelSettings::default(),
            temperature: 0.0,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn tools_bound(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated assistant message, including any tool-call requests
    pub message: Message,

    /// Why generation stopped (`end_turn`, `tool_use`, `max_tokens`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A single chunk in a streaming response.
///
/// Text arrives as `content` deltas. Tool-call requests and the stop reason
/// arrive complete, on the chunk that closes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Fully assembled tool-call requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// The turn controller calls `stream()` for every model call and never knows
/// which backend or wire flavour is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let text = response.message.text();
        let _ = tx.send(Ok(StreamChunk {
            content: (!text.is_empty()).then_some(text),
            tool_calls: response.message.tool_calls,
            done: true,
            stop_reason: response.stop_reason,
            usage: response.usage,
        })).await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError> {
            Ok(ModelResponse {
                message: Message::assistant_with_tool_calls(
                    "checking",
                    vec![ToolCallRequest::new("t1", "logs_get_overview", serde_json::json!({}))],
                ),
                stop_reason: Some("tool_use".into()),
                usage: None,
                model: "fixed-model".into(),
            })
        }
    }

    #[test]
    fn request_defaults_to_no_tools() {
        let req = ModelRequest::new("system", vec![]);
        assert!(!req.tools_bound());
        assert!(req.temperature.abs() < f32::EPSILON);
        assert!(req.clone().with_tools(vec![]).tools.is_some());
        assert!(!req.with_tools(vec![]).tools_bound());
    }

    #[test]
    fn settings_debug_redacts_key() {
        let settings = ModelSettings { api_key: Some("sk-secret".into()), ..Default::default() };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let mut rx = FixedProvider.stream(ModelRequest::new("s", vec![])).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("checking"));
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.stop_reason.as_deref(), Some("tool_use"));
        assert!(rx.recv().await.is_none());
    }
}
