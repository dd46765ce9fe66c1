//! Turn-context construction from an organization's service mappings.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use triage_config::ServicesConfig;
use triage_core::error::ToolError;
use triage_core::organization::Organization;
use triage_core::service::{Service, TurnContext};

use crate::client::HttpServiceClient;

/// Build the clients available to one turn.
///
/// A backend exists only for services where the organization carries an org
/// id. Its base URL is the organization's own, or the global default.
pub fn build_turn_context(org: &Organization, services: &ServicesConfig) -> Result<TurnContext, ToolError> {
    let timeout = Duration::from_secs(services.request_timeout_secs);
    let mut ctx = TurnContext::new();

    for service in Service::ALL {
        let mapping = org.services.get(service);
        let Some(org_id) = mapping.org_id() else {
            debug!(service = %service, org = %org.id, "Service not mapped for organization");
            continue;
        };
        let base_url = mapping
            .base_url()
            .unwrap_or_else(|| services.default_url(service).to_string());

        let mut client = HttpServiceClient::new(service, base_url, org_id, timeout)?;
        if service == Service::CodeParser {
            client = client.with_repo_id(mapping.repo_id());
        }
        ctx = ctx.with_backend(Arc::new(client));
    }

    info!(org = %org.id, services = ?ctx.services(), "Turn context built");
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::organization::ServiceMapping;

    #[test]
    fn only_mapped_services_get_backends() {
        let mut org = Organization { id: "acme".into(), ..Default::default() };
        org.services.logs_explorer = ServiceMapping {
            base_url: None,
            org_id: Some("logs-org".into()),
            repo_id: None,
        };
        org.services.metrics_explorer = ServiceMapping {
            base_url: Some("http://metrics.acme".into()),
            org_id: Some("  ".into()),
            repo_id: None,
        };

        let ctx = build_turn_context(&org, &ServicesConfig::default()).unwrap();
        assert_eq!(ctx.services(), vec![Service::LogsExplorer]);
        assert!(ctx.backend(Service::MetricsExplorer).is_err());
        assert_eq!(ctx.backend(Service::LogsExplorer).unwrap().org_id(), "logs-org");
    }

    #[test]
    fn code_parser_carries_repo_scope() {
        let mut org = Organization { id: "acme".into(), ..Default::default() };
        org.services.code_parser = ServiceMapping {
            base_url: Some("http://code.acme".into()),
            org_id: Some("cp-org".into()),
            repo_id: Some("repo-9".into()),
        };

        let ctx = build_turn_context(&org, &ServicesConfig::default()).unwrap();
        let backend = ctx.backend(Service::CodeParser).unwrap();
        assert_eq!(backend.repo_id(), Some("repo-9"));
    }

    #[test]
    fn empty_organization_has_no_backends() {
        let org = Organization { id: "bare".into(), ..Default::default() };
        let ctx = build_turn_context(&org, &ServicesConfig::default()).unwrap();
        assert!(ctx.services().is_empty());
    }
}
