//! Downstream services and the turn-scoped context that carries their clients.
//!
//! A [`TurnContext`] is built at turn start from the organization's service
//! mappings and threaded explicitly through every tool invocation. Nothing is
//! stored in shared module state, so concurrent turns never see each other's
//! clients.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ToolError;

/// The downstream services the agent can investigate through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    CodeParser,
    MetricsExplorer,
    LogsExplorer,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::CodeParser, Service::MetricsExplorer, Service::LogsExplorer];

    /// Human-readable name used in tool error payloads.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::CodeParser => "Code Parser",
            Self::MetricsExplorer => "Metrics Explorer",
            Self::LogsExplorer => "Logs Explorer",
        }
    }

    pub fn not_configured(self) -> ToolError {
        ToolError::NotConfigured {
            service: self.display_name().to_string(),
            message: format!("{} is not configured for this organization", self.display_name()),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A client for one downstream service, bound to one organization.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    fn service(&self) -> Service;

    /// The organization ID inside this service.
    fn org_id(&self) -> &str;

    /// Repository scope (Code Parser only).
    fn repo_id(&self) -> Option<&str> {
        None
    }

    /// HTTP GET a JSON document.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<serde_json::Value, ToolError>;

    /// HTTP POST a JSON body, returning the JSON response.
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        headers: &[(&str, String)],
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Release any held connections.
    async fn close(&self) {}
}

/// The capability clients available to one turn.
#[derive(Clone, Default)]
pub struct TurnContext {
    backends: HashMap<Service, Arc<dyn ServiceBackend>>,
}

impl TurnContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend, keyed by the service it reports.
    pub fn with_backend(mut self, backend: Arc<dyn ServiceBackend>) -> Self {
        self.backends.insert(backend.service(), backend);
        self
    }

    /// Resolve the backend for a service, or a `NotConfigured` error.
    pub fn backend(&self, service: Service) -> std::result::Result<Arc<dyn ServiceBackend>, ToolError> {
        self.backends
            .get(&service)
            .cloned()
            .ok_or_else(|| service.not_configured())
    }

    pub fn is_configured(&self, service: Service) -> bool {
        self.backends.contains_key(&service)
    }

    /// Configured services, in a stable order.
    pub fn services(&self) -> Vec<Service> {
        let mut services: Vec<_> = self.backends.keys().copied().collect();
        services.sort();
        services
    }

    /// Close every backend. Safe to call more than once.
    pub async fn close_all(&self) {
        for (service, backend) in &self.backends {
            debug!(service = %service, "Closing service client");
            backend.close().await;
        }
    }
}
