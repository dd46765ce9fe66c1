//! Configuration loading, validation, and management for Triage.
//!
//! Loads configuration from `~/.triage/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use triage_core::Organization;

/// Id given to the configured organization when it names none.
pub const DEFAULT_ORGANIZATION_ID: &str = "default";

/// The root configuration structure.
///
/// Maps directly to `~/.triage/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model provider defaults
    #[serde(default)]
    pub model: ModelConfig,

    /// Per-turn hard limits
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// History compaction thresholds
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Global defaults for the downstream services
    #[serde(default)]
    pub services: ServicesConfig,

    /// The organization used by the CLI and as the gateway's default tenant
    #[serde(default)]
    pub organization: Organization,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Which wire flavour the model endpoint speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFlavor {
    /// Anthropic Messages API (`/v1/messages`, streaming)
    #[default]
    Messages,
    /// Bedrock invoke proxy (`/bedrock/model/{id}/invoke`)
    BedrockProxy,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Executable printing an API key on stdout, used when no key is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_helper: Option<PathBuf>,

    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub flavor: ApiFlavor,

    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Default max output tokens per model call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,
}

fn default_model_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model_id() -> String {
    "claude-sonnet-4-5".into()
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_helper: None,
            base_url: default_model_base_url(),
            flavor: ApiFlavor::default(),
            model_id: default_model_id(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_key_helper", &self.api_key_helper)
            .field("base_url", &self.base_url)
            .field("flavor", &self.flavor)
            .field("model_id", &self.model_id)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Hard limits enforced by the turn controller. Immutable for a turn's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Maximum model invocations per turn
    #[serde(default = "default_max_ai_calls")]
    pub max_ai_calls: u32,

    /// Estimated input-token budget before synthesis is forced
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,

    /// Maximum controller steps (model calls + tool executions)
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,

    /// Tool results longer than this are truncated
    #[serde(default = "default_tool_response_max_chars")]
    pub tool_response_max_chars: usize,

    /// Characters per estimated token
    #[serde(default = "default_token_estimation_divisor")]
    pub token_estimation_divisor: usize,
}

fn default_max_ai_calls() -> u32 {
    15
}
fn default_max_input_tokens() -> usize {
    80_000
}
fn default_recursion_limit() -> u32 {
    35
}
fn default_tool_response_max_chars() -> usize {
    12_000
}
fn default_token_estimation_divisor() -> usize {
    4
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_ai_calls: default_max_ai_calls(),
            max_input_tokens: default_max_input_tokens(),
            recursion_limit: default_recursion_limit(),
            tool_response_max_chars: default_tool_response_max_chars(),
            token_estimation_divisor: default_token_estimation_divisor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Below this many prior messages, history is passed verbatim
    #[serde(default = "default_min_messages_for_summary")]
    pub min_messages_for_summary: usize,

    /// Most recent messages always kept verbatim
    #[serde(default = "default_recent_message_count")]
    pub recent_message_count: usize,

    /// Characters kept when summarization fails
    #[serde(default = "default_fallback_summary_chars")]
    pub fallback_summary_chars: usize,
}

fn default_min_messages_for_summary() -> usize {
    6
}
fn default_recent_message_count() -> usize {
    4
}
fn default_fallback_summary_chars() -> usize {
    500
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_messages_for_summary: default_min_messages_for_summary(),
            recent_message_count: default_recent_message_count(),
            fallback_summary_chars: default_fallback_summary_chars(),
        }
    }
}

/// Global service defaults; organizations may override the base URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_code_parser_url")]
    pub code_parser_url: String,

    #[serde(default = "default_metrics_explorer_url")]
    pub metrics_explorer_url: String,

    #[serde(default = "default_logs_explorer_url")]
    pub logs_explorer_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_code_parser_url() -> String {
    "http://localhost:8000".into()
}
fn default_metrics_explorer_url() -> String {
    "http://localhost:8002".into()
}
fn default_logs_explorer_url() -> String {
    "http://localhost:8003".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl ServicesConfig {
    pub fn default_url(&self, service: triage_core::Service) -> &str {
        match service {
            triage_core::Service::CodeParser => &self.code_parser_url,
            triage_core::Service::MetricsExplorer => &self.metrics_explorer_url,
            triage_core::Service::LogsExplorer => &self.logs_explorer_url,
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            code_parser_url: default_code_parser_url(),
            metrics_explorer_url: default_metrics_explorer_url(),
            logs_explorer_url: default_logs_explorer_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8100
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.triage/config.toml).
    ///
    /// Environment variables override file values:
    /// - `TRIAGE_API_KEY`, then `ANTHROPIC_API_KEY`
    /// - `TRIAGE_PROVIDER_URL`, `TRIAGE_MODEL_ID`, `TRIAGE_MAX_TOKENS`
    /// - `TRIAGE_MAX_AI_CALLS`, `TRIAGE_MAX_INPUT_TOKENS`, `TRIAGE_RECURSION_LIMIT`,
    ///   `TRIAGE_TOOL_RESPONSE_MAX_CHARS`, `TRIAGE_TOKEN_ESTIMATION_DIVISOR`
    /// - `TRIAGE_CODE_PARSER_URL`, `TRIAGE_METRICS_EXPLORER_URL`, `TRIAGE_LOGS_EXPLORER_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("TRIAGE_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY")) {
            self.model.api_key = Some(key);
        }
        if let Some(url) = lookup("TRIAGE_PROVIDER_URL") {
            self.model.base_url = url;
        }
        if let Some(model) = lookup("TRIAGE_MODEL_ID") {
            self.model.model_id = model;
        }
        if let Some(v) = lookup("TRIAGE_MAX_TOKENS") {
            self.model.max_tokens = parse_env("TRIAGE_MAX_TOKENS", &v)?;
        }

        let g = &mut self.guardrails;
        if let Some(v) = lookup("TRIAGE_MAX_AI_CALLS") {
            g.max_ai_calls = parse_env("TRIAGE_MAX_AI_CALLS", &v)?;
        }
        if let Some(v) = lookup("TRIAGE_MAX_INPUT_TOKENS") {
            g.max_input_tokens = parse_env("TRIAGE_MAX_INPUT_TOKENS", &v)?;
        }
        if let Some(v) = lookup("TRIAGE_RECURSION_LIMIT") {
            g.recursion_limit = parse_env("TRIAGE_RECURSION_LIMIT", &v)?;
        }
        if let Some(v) = lookup("TRIAGE_TOOL_RESPONSE_MAX_CHARS") {
            g.tool_response_max_chars = parse_env("TRIAGE_TOOL_RESPONSE_MAX_CHARS", &v)?;
        }
        if let Some(v) = lookup("TRIAGE_TOKEN_ESTIMATION_DIVISOR") {
            g.token_estimation_divisor = parse_env("TRIAGE_TOKEN_ESTIMATION_DIVISOR", &v)?;
        }

        if let Some(url) = lookup("TRIAGE_CODE_PARSER_URL") {
            self.services.code_parser_url = url;
        }
        if let Some(url) = lookup("TRIAGE_METRICS_EXPLORER_URL") {
            self.services.metrics_explorer_url = url;
        }
        if let Some(url) = lookup("TRIAGE_LOGS_EXPLORER_URL") {
            self.services.logs_explorer_url = url;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".triage")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.guardrails;
        if g.max_ai_calls == 0 {
            return Err(ConfigError::ValidationError("guardrails.max_ai_calls must be at least 1".into()));
        }
        if g.token_estimation_divisor == 0 {
            return Err(ConfigError::ValidationError(
                "guardrails.token_estimation_divisor must be greater than 0".into(),
            ));
        }
        if g.tool_response_max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "guardrails.tool_response_max_chars must be greater than 0".into(),
            ));
        }
        if g.recursion_limit < g.max_ai_calls {
            return Err(ConfigError::ValidationError(format!(
                "guardrails.recursion_limit ({}) must be at least max_ai_calls ({})",
                g.recursion_limit, g.max_ai_calls
            )));
        }

        let c = &self.compaction;
        if c.recent_message_count >= c.min_messages_for_summary {
            return Err(ConfigError::ValidationError(
                "compaction.recent_message_count must be smaller than min_messages_for_summary".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Check if a model API key source is available.
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
            || self.model.api_key_helper.is_some()
            || self.organization.model.settings().api_key.is_some()
    }

    /// The configured organization, with `"default"` as its id when unset.
    pub fn default_organization(&self) -> Organization {
        let mut org = self.organization.clone();
        if org.id.trim().is_empty() {
            org.id = DEFAULT_ORGANIZATION_ID.into();
        }
        org
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has an invalid value: {value:?}")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unnamed_organization_gets_default_id() {
        let mut config = AppConfig::default();
        assert_eq!(config.default_organization().id, DEFAULT_ORGANIZATION_ID);
        config.organization.id = "acme".into();
        assert_eq!(config.default_organization().id, "acme");
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.guardrails.max_ai_calls, 15);
        assert_eq!(config.guardrails.max_input_tokens, 80_000);
        assert_eq!(config.guardrails.recursion_limit, 35);
        assert_eq!(config.guardrails.tool_response_max_chars, 12_000);
        assert_eq!(config.guardrails.token_estimation_divisor, 4);
        assert_eq!(config.compaction.min_messages_for_summary, 6);
        assert_eq!(config.compaction.recent_message_count, 4);
        assert_eq!(config.model.max_tokens, 4096);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.guardrails, config.guardrails);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn zero_divisor_rejected() {
        let mut config = AppConfig::default();
        config.guardrails.token_estimation_divisor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn recursion_limit_below_call_budget_rejected() {
        let mut config = AppConfig::default();
        config.guardrails.recursion_limit = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recursion_limit"));
    }

    #[test]
    fn compaction_window_must_fit_threshold() {
        let mut config = AppConfig::default();
        config.compaction.recent_message_count = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.guardrails.max_ai_calls, 15);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[guardrails]
max_ai_calls = 5

[model]
flavor = "bedrock_proxy"
base_url = "https://llm-proxy.internal"

[organization]
id = "acme"

[organization.services.logs_explorer]
org_id = "L-42"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.guardrails.max_ai_calls, 5);
        assert_eq!(config.guardrails.max_input_tokens, 80_000);
        assert_eq!(config.model.flavor, ApiFlavor::BedrockProxy);
        assert_eq!(config.organization.id, "acme");
        assert_eq!(config.organization.services.logs_explorer.org_id.as_deref(), Some("L-42"));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[guardrails\nmax_ai_calls = ").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "sk-env"),
            ("TRIAGE_MAX_AI_CALLS", "3"),
            ("TRIAGE_TOKEN_ESTIMATION_DIVISOR", "2"),
            ("TRIAGE_LOGS_EXPLORER_URL", "http://logs:9000"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.model.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.guardrails.max_ai_calls, 3);
        assert_eq!(config.guardrails.token_estimation_divisor, 2);
        assert_eq!(config.services.logs_explorer_url, "http://logs:9000");
    }

    #[test]
    fn invalid_env_number_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env_overrides(|k| (k == "TRIAGE_MAX_AI_CALLS").then(|| "many".to_string()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_ai_calls = 15"));
        assert!(toml_str.contains("8100"));
    }
}
