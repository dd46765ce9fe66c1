//! Scripted service backend for tool tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use triage_core::error::ToolError;
use triage_core::service::{Service, ServiceBackend, TurnContext};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

/// Answers by path; unknown paths fail with HTTP 404.
pub struct MockBackend {
    service: Service,
    repo_id: Option<String>,
    responses: HashMap<String, Result<Value, ToolError>>,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl MockBackend {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            repo_id: None,
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_repo(mut self, repo_id: &str) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    pub fn respond(mut self, path: &str, value: Value) -> Self {
        self.responses.insert(path.into(), Ok(value));
        self
    }

    pub fn fail(mut self, path: &str, status: u16, detail: &str) -> Self {
        self.responses.insert(
            path.into(),
            Err(ToolError::Invocation {
                service: self.service.display_name().into(),
                status_code: Some(status),
                detail: detail.into(),
            }),
        );
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, call: RecordedCall) -> Result<Value, ToolError> {
        let path = call.path.clone();
        self.calls.lock().unwrap().push(call);
        self.responses.get(&path).cloned().unwrap_or_else(|| {
            Err(ToolError::Invocation {
                service: self.service.display_name().into(),
                status_code: Some(404),
                detail: format!("no route {path}"),
            })
        })
    }
}

#[async_trait]
impl ServiceBackend for MockBackend {
    fn service(&self) -> Service {
        self.service
    }

    fn org_id(&self) -> &str {
        "org-1"
    }

    fn repo_id(&self) -> Option<&str> {
        self.repo_id.as_deref()
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ToolError> {
        self.answer(RecordedCall {
            method: "GET",
            path: path.into(),
            query: query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            body: Value::Null,
            headers: Vec::new(),
        })
    }

    async fn post(&self, path: &str, body: Value, headers: &[(&str, String)]) -> Result<Value, ToolError> {
        self.answer(RecordedCall {
            method: "POST",
            path: path.into(),
            query: Vec::new(),
            body,
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        })
    }
}

pub fn context_with(backend: Arc<MockBackend>) -> TurnContext {
    TurnContext::new().with_backend(backend)
}
