//! Code Parser capabilities, all scoped to the organization's repository.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use triage_core::error::ToolError;
use triage_core::service::{Service, ServiceBackend, TurnContext};
use triage_core::tool::Tool;

use crate::format::{DEFAULT_JSON_LIMIT, compact_list, optional_str, required_str, safe_json};

const SERVICE: Service = Service::CodeParser;
const MAX_FLOW_IDS: usize = 5;

/// The Code Parser backend together with its repository path prefix.
fn repo_scope(ctx: &TurnContext) -> Result<(Arc<dyn ServiceBackend>, String), ToolError> {
    let backend = ctx.backend(SERVICE)?;
    let repo = backend.repo_id().ok_or_else(|| ToolError::NotConfigured {
        service: SERVICE.display_name().into(),
        message: "Code Parser repository is not configured for this organization".into(),
    })?;
    let prefix = format!("/api/v1/orgs/{}/repos/{repo}", backend.org_id());
    Ok((backend, prefix))
}

pub struct CodeSearchEntryPointsTool;

#[async_trait]
impl Tool for CodeSearchEntryPointsTool {
    fn name(&self) -> &str {
        "code_search_entry_points"
    }

    fn description(&self) -> &str {
        "Search entry points (HTTP endpoints, event handlers, schedulers) by regex on name and description."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search": {"type": "string", "description": "Regex pattern (e.g. 'fraud', 'payment|transaction', 'POST.*risk')"},
                "entry_point_type": {"type": "string", "enum": ["HTTP", "EVENT", "SCHEDULER"], "description": "Optional type filter"}
            }
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let search = args.get("search").and_then(Value::as_str).unwrap_or_default();
        let kind = optional_str(&args, "entry_point_type");
        let (backend, prefix) = repo_scope(ctx)?;

        let result = backend
            .get(
                &format!("{prefix}/entry-points"),
                &[("search", search.to_string()), ("limit", "100".into()), ("offset", "0".into())],
            )
            .await?;

        let Some(list) = result.as_array() else {
            return Ok(safe_json(&result, DEFAULT_JSON_LIMIT));
        };
        let filtered: Vec<Value> = list
            .iter()
            .filter(|ep| kind.is_none_or(|k| ep.get("entry_point_type").and_then(Value::as_str) == Some(k)))
            .cloned()
            .collect();

        Ok(safe_json(
            &json!({
                "total_count": filtered.len(),
                "entry_points": compact_list(
                    &filtered,
                    &["id", "name", "description", "entry_point_type", "framework", "metadata", "ai_confidence"],
                    30,
                ),
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

/// Flows are large but valuable, so they get the full tool response budget.
pub struct CodeGetFlowsTool {
    max_chars: usize,
}

impl CodeGetFlowsTool {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

#[async_trait]
impl Tool for CodeGetFlowsTool {
    fn name(&self) -> &str {
        "code_get_flows"
    }

    fn description(&self) -> &str {
        "Get step-by-step execution flow documentation for entry points, including code snippets, \
         file paths, and log lines. Accepts at most 5 entry point IDs."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entry_point_ids": {"type": "array", "items": {"type": "string"}, "description": "Entry point IDs from code_search_entry_points (max 5)"}
            },
            "required": ["entry_point_ids"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let ids: Vec<Value> = args
            .get("entry_point_ids")
            .and_then(Value::as_array)
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments {
                service: SERVICE.display_name().into(),
                message: "Missing 'entry_point_ids' argument".into(),
            })?
            .iter()
            .take(MAX_FLOW_IDS)
            .cloned()
            .collect();
        let (backend, prefix) = repo_scope(ctx)?;

        let result = backend
            .post(&format!("{prefix}/flows"), json!({"entry_point_ids": ids}), &[])
            .await?;
        Ok(safe_json(&result, self.max_chars))
    }
}

pub struct CodeSearchFilesTool;

#[async_trait]
impl Tool for CodeSearchFilesTool {
    fn name(&self) -> &str {
        "code_search_files"
    }

    fn description(&self) -> &str {
        "Search source code files by regex on the relative file path."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search": {"type": "string", "description": "Regex on relative_path (e.g. 'controller|handler', 'FraudService', '\\\\.py$')"}
            },
            "required": ["search"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let search = required_str(&args, "search", SERVICE)?;
        let (backend, prefix) = repo_scope(ctx)?;

        let result = backend
            .get(
                &format!("{prefix}/files"),
                &[("search", search.to_string()), ("limit", "50".into()), ("offset", "0".into())],
            )
            .await?;

        let Some(list) = result.as_array() else {
            return Ok(safe_json(&result, DEFAULT_JSON_LIMIT));
        };
        Ok(safe_json(
            &json!({
                "total_count": list.len(),
                "files": compact_list(list, &["id", "relative_path", "language"], 30),
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

pub struct CodeGetFileTool {
    max_chars: usize,
}

impl CodeGetFileTool {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

#[async_trait]
impl Tool for CodeGetFileTool {
    fn name(&self) -> &str {
        "code_get_file"
    }

    fn description(&self) -> &str {
        "Read the full source code of one file. Use after finding the file via code_search_files or flow documentation."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_id": {"type": "string", "description": "File ID from code_search_files or flow file paths"}
            },
            "required": ["file_id"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let file_id = required_str(&args, "file_id", SERVICE)?;
        let (backend, prefix) = repo_scope(ctx)?;
        let result = backend.get(&format!("{prefix}/files/{file_id}"), &[]).await?;
        Ok(safe_json(&result, self.max_chars))
    }
}
