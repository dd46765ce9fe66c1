//! HTTP client for the downstream services.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};
use triage_core::error::ToolError;
use triage_core::service::{Service, ServiceBackend};

use crate::format::truncate_chars;

/// Characters of an error body kept in the tool-facing error detail.
const ERROR_DETAIL_CHARS: usize = 300;
/// Characters of an error body written to the log.
const ERROR_LOG_CHARS: usize = 500;

/// A JSON-over-HTTP client for one service, bound to one organization.
pub struct HttpServiceClient {
    service: Service,
    base_url: String,
    org_id: String,
    repo_id: Option<String>,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpServiceClient {
    pub fn new(
        service: Service,
        base_url: impl Into<String>,
        org_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Invocation {
                service: service.display_name().into(),
                status_code: None,
                detail: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            service,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            org_id: org_id.into(),
            repo_id: None,
            client: Mutex::new(Some(client)),
        })
    }

    pub fn with_repo_id(mut self, repo_id: Option<String>) -> Self {
        self.repo_id = repo_id;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http(&self) -> Result<reqwest::Client, ToolError> {
        let guard = self.client.lock().map_err(|_| self.failure(None, "client lock poisoned".into()))?;
        guard.clone().ok_or_else(|| self.failure(None, "client already closed".into()))
    }

    fn failure(&self, status_code: Option<u16>, detail: String) -> ToolError {
        ToolError::Invocation {
            service: self.service.display_name().into(),
            status_code,
            detail,
        }
    }

    async fn finish(&self, url: &str, response: Result<reqwest::Response, reqwest::Error>) -> Result<serde_json::Value, ToolError> {
        let response = response.map_err(|e| {
            error!(service = %self.service, url = %url, error = %e, "Service connection error");
            self.failure(None, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                service = %self.service,
                url = %url,
                status_code = status.as_u16(),
                response_text = %truncate_chars(&body, ERROR_LOG_CHARS),
                "Service returned an error status"
            );
            return Err(self.failure(Some(status.as_u16()), truncate_chars(&body, ERROR_DETAIL_CHARS).to_string()));
        }

        response.json().await.map_err(|e| {
            error!(service = %self.service, url = %url, error = %e, "Service returned invalid JSON");
            self.failure(None, format!("invalid JSON response: {e}"))
        })
    }
}

#[async_trait]
impl ServiceBackend for HttpServiceClient {
    fn service(&self) -> Service {
        self.service
    }

    fn org_id(&self) -> &str {
        &self.org_id
    }

    fn repo_id(&self) -> Option<&str> {
        self.repo_id.as_deref()
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, ToolError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(service = %self.service, url = %url, params = ?query, "HTTP GET");
        let response = self.http()?.get(&url).query(query).send().await;
        self.finish(&url, response).await
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value, ToolError> {
        let url = format!("{}{}", self.base_url, path);
        let body_keys: Vec<&String> = body.as_object().map(|o| o.keys().collect()).unwrap_or_default();
        info!(service = %self.service, url = %url, body_keys = ?body_keys, "HTTP POST");

        let mut request = self.http()?.post(&url).json(&body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request.send().await;
        self.finish(&url, response).await
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.client.lock() {
            if guard.take().is_some() {
                debug!(service = %self.service, "Service client closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpServiceClient {
        HttpServiceClient::new(Service::LogsExplorer, "http://logs.local/", "org-1", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn base_url_is_normalized() {
        let c = client();
        assert_eq!(c.base_url(), "http://logs.local");
        assert_eq!(c.org_id(), "org-1");
        assert!(c.repo_id().is_none());
    }

    #[tokio::test]
    async fn closed_client_refuses_requests() {
        let c = client();
        c.close().await;
        let err = c.get("/api/v1/organizations/org-1", &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_ERROR");
        assert!(err.to_string().contains("closed"));
        assert_eq!(err.service(), Some("Logs Explorer"));
        // second close is a no-op
        c.close().await;
    }

    #[tokio::test]
    async fn connection_failure_is_invocation_error() {
        let c = HttpServiceClient::new(Service::CodeParser, "http://127.0.0.1:9", "org", Duration::from_secs(2)).unwrap();
        let err = c.get("/x", &[]).await.unwrap_err();
        assert!(matches!(err, ToolError::Invocation { status_code: None, .. }));
    }
}
