//! Organizations and their per-tenant overrides.

use serde::{Deserialize, Serialize};

use crate::provider::ModelSettings;
use crate::service::Service;

/// A tenant: which services it is mapped to and how its model calls are made.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// AI overrides, applied per model call
    #[serde(default)]
    pub model: ModelOverrides,

    #[serde(default)]
    pub services: ServiceMappings,
}

/// Per-organization model overrides. Unset or empty means "use the global default".
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ModelOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelOverrides {
    /// Per-call settings with empty strings and zero limits treated as unset.
    pub fn settings(&self) -> ModelSettings {
        ModelSettings {
            api_key: non_empty(&self.api_key),
            base_url: non_empty(&self.provider_url),
            model_id: non_empty(&self.model_id),
            max_tokens: self.max_tokens.filter(|n| *n > 0),
        }
    }
}

impl std::fmt::Debug for ModelOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelOverrides")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("provider_url", &self.provider_url)
            .field("model_id", &self.model_id)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// How an organization maps onto one downstream service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMapping {
    /// Org-specific base URL; falls back to the global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// The organization's ID inside the service. Unset means not configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Repository ID (Code Parser only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
}

impl ServiceMapping {
    pub fn org_id(&self) -> Option<String> {
        non_empty(&self.org_id)
    }

    pub fn base_url(&self) -> Option<String> {
        non_empty(&self.base_url)
    }

    pub fn repo_id(&self) -> Option<String> {
        non_empty(&self.repo_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMappings {
    #[serde(default)]
    pub code_parser: ServiceMapping,

    #[serde(default)]
    pub metrics_explorer: ServiceMapping,

    #[serde(default)]
    pub logs_explorer: ServiceMapping,
}

impl ServiceMappings {
    pub fn get(&self, service: Service) -> &ServiceMapping {
        match service {
            Service::CodeParser => &self.code_parser,
            Service::MetricsExplorer => &self.metrics_explorer,
            Service::LogsExplorer => &self.logs_explorer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overrides_fall_back_to_defaults() {
        let overrides = ModelOverrides {
            api_key: Some("".into()),
            provider_url: Some("  ".into()),
            model_id: None,
            max_tokens: Some(0),
        };
        assert_eq!(overrides.settings(), ModelSettings::default());
    }

    #[test]
    fn set_overrides_are_applied() {
        let overrides = ModelOverrides {
            api_key: Some("org-key".into()),
            provider_url: Some("https://proxy.internal".into()),
            model_id: Some("claude-sonnet".into()),
            max_tokens: Some(2048),
        };
        let settings = overrides.settings();
        assert_eq!(settings.api_key.as_deref(), Some("org-key"));
        assert_eq!(settings.base_url.as_deref(), Some("https://proxy.internal"));
        assert_eq!(settings.model_id.as_deref(), Some("claude-sonnet"));
        assert_eq!(settings.max_tokens, Some(2048));
        assert!(!format!("{overrides:?}").contains("org-key"));
    }

    #[test]
    fn organization_parses_from_toml_like_json() {
        let org: Organization = serde_json::from_str(
            r#"{"id":"acme","services":{"logs_explorer":{"org_id":"L-1"}}}"#,
        )
        .unwrap();
        assert_eq!(org.services.get(Service::LogsExplorer).org_id().as_deref(), Some("L-1"));
        assert!(org.services.get(Service::CodeParser).org_id().is_none());
    }
}
