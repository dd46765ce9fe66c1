//! Error types for the Triage domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde_json::json;
use thiserror::Error;

/// The top-level error type for all Triage operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Turn control ---
    #[error("Run aborted: {reason}")]
    RunAborted { reason: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the model-provider call itself. These abort a turn.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures raised while executing a tool call.
///
/// These never abort a turn: the controller renders them with
/// [`ToolError::to_payload`] and hands the result back to the model.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The capability has no backend for the calling organization.
    #[error("{message}")]
    NotConfigured { service: String, message: String },

    /// The capability's backend failed.
    #[error("{}", invocation_message(*status_code, detail))]
    Invocation {
        service: String,
        status_code: Option<u16>,
        detail: String,
    },

    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments: {message}")]
    InvalidArguments { service: String, message: String },
}

fn invocation_message(status_code: Option<u16>, detail: &str) -> String {
    match status_code {
        Some(status) => format!("HTTP {status}: {detail}"),
        None => detail.to_string(),
    }
}

impl ToolError {
    /// Stable error code exposed to the model.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured { .. } => "SERVICE_NOT_CONFIGURED",
            Self::Invocation { status_code: Some(_), .. } => "API_ERROR",
            Self::Invocation { status_code: None, .. } => "UNKNOWN_ERROR",
            Self::Unknown(_) => "UNKNOWN_TOOL",
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
        }
    }

    /// The service display name this error belongs to, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::NotConfigured { service, .. }
            | Self::Invocation { service, .. }
            | Self::InvalidArguments { service, .. } => Some(service),
            Self::Unknown(_) => None,
        }
    }

    /// Render the structured textual form handed back to the model.
    pub fn to_payload(&self) -> String {
        let mut payload = json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });
        if let Some(service) = self.service() {
            payload["service"] = json!(service);
        }
        if let Self::Invocation { status_code: Some(status), .. } = self {
            payload["status_code"] = json!(status);
        }
        payload.to_string()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),
}
