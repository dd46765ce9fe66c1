//! Logs Explorer capabilities.

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use triage_core::error::ToolError;
use triage_core::service::{Service, ServiceBackend, TurnContext};
use triage_core::tool::Tool;

use crate::format::{
    DEFAULT_JSON_LIMIT, compact_list, field, find_list, optional_str, required_str, safe_json, truncate_chars,
};

const SERVICE: Service = Service::LogsExplorer;

/// Seven days.
const MAX_TIME_RANGE_MINUTES: i64 = 10_080;
const MAX_RESULTS: u64 = 200;
/// String fields in a log entry longer than this are cut.
const MAX_FIELD_CHARS: usize = 500;

fn org_prefix(backend: &dyn ServiceBackend) -> String {
    format!("/api/v1/organizations/{}", backend.org_id())
}

pub struct LogsOverviewTool;

#[async_trait]
impl Tool for LogsOverviewTool {
    fn name(&self) -> &str {
        "logs_get_overview"
    }

    fn description(&self) -> &str {
        "Get the logs organization overview including used (important) indexes. \
         ALWAYS call this first for logs investigation. Returns org name, used indexes, and index/source/application counts."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, ctx: &TurnContext, _args: Value) -> Result<String, ToolError> {
        let backend = ctx.backend(SERVICE)?;
        let org = backend.get(&org_prefix(backend.as_ref()), &[]).await?;
        Ok(safe_json(
            &json!({
                "org_name": field(&org, "name"),
                "used_indexes": org.get("used_indexes").cloned().unwrap_or_else(|| json!([])),
                "index_count": field(&org, "index_count"),
                "source_count": field(&org, "source_count"),
                "application_count": field(&org, "application_count"),
                "provider_configured": field(&org, "provider_configured"),
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

pub struct LogsSearchSourcesTool;

#[async_trait]
impl Tool for LogsSearchSourcesTool {
    fn name(&self) -> &str {
        "logs_search_sources"
    }

    fn description(&self) -> &str {
        "Search for log sources (services) by keyword. Space-separated terms are an OR search and * is a wildcard."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search": {"type": "string", "description": "Search pattern (e.g. 'ccfraud', 'payment*fraud', 'payment fraud')"},
                "repository_id": {"type": "string", "description": "Optional index/repository ID to scope the search"}
            },
            "required": ["search"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let search = required_str(&args, "search", SERVICE)?;
        let backend = ctx.backend(SERVICE)?;

        let mut body = json!({"search": search});
        if let Some(repo) = optional_str(&args, "repository_id") {
            body["repository_id"] = json!(repo);
        }
        let result = backend
            .post(&format!("{}/sources/search", org_prefix(backend.as_ref())), body, &[])
            .await?;

        if !result.is_object() {
            return Ok(safe_json(&result, DEFAULT_JSON_LIMIT));
        }
        let matches = find_list(&result, &["matches", "sources", "data"]);
        Ok(safe_json(
            &json!({
                "total_matches": matches.len(),
                "matches": compact_list(
                    matches,
                    &["name", "repository_name", "repository_id", "total_count", "last_event_at"],
                    30,
                ),
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

pub struct LogsSearchTool;

#[async_trait]
impl Tool for LogsSearchTool {
    fn name(&self) -> &str {
        "logs_search"
    }

    fn description(&self) -> &str {
        "Search application logs for errors, exceptions, and patterns. \
         Use logs_get_overview to find the used indexes first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": {"type": "string", "description": "Log index name (e.g. 'prod_g2')"},
                "source": {"type": "string", "description": "Service/source name filter (auto-wrapped with wildcards)"},
                "query_terms": {"type": "array", "items": {"type": "string"}, "description": "Search terms (e.g. ['ERROR', 'timeout']); each is quoted"},
                "time_range_minutes": {"type": "integer", "description": "Minutes back to search (default 60, max 10080 = 7 days)", "default": 60},
                "max_results": {"type": "integer", "description": "Max log entries (default 50, max 200)", "default": 50}
            },
            "required": ["index"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let index = required_str(&args, "index", SERVICE)?;
        let source = optional_str(&args, "source");
        let terms = args.get("query_terms").filter(|t| t.as_array().is_some_and(|a| !a.is_empty()));
        let minutes = args.get("time_range_minutes").and_then(Value::as_i64).unwrap_or(60);
        let max_results = args.get("max_results").and_then(Value::as_u64).unwrap_or(50).min(MAX_RESULTS);
        let backend = ctx.backend(SERVICE)?;

        let now = Utc::now();
        let from = now - Duration::minutes(minutes.clamp(0, MAX_TIME_RANGE_MINUTES));
        let mut body = json!({
            "index": index,
            "from_time": from.to_rfc3339_opts(SecondsFormat::Micros, true),
            "to_time": now.to_rfc3339_opts(SecondsFormat::Micros, true),
            "max_results": max_results,
        });
        if let Some(source) = source {
            body["source"] = json!(source);
        }
        if let Some(terms) = terms {
            body["query"] = terms.clone();
        }

        let result = backend.post(&format!("{}/search", org_prefix(backend.as_ref())), body, &[]).await?;

        let echo = json!({
            "index": index,
            "source": source,
            "terms": terms,
            "time_range_minutes": minutes,
        });
        let data = result.get("data").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        if data.is_empty() {
            return Ok(safe_json(
                &json!({
                    "total_results": 0,
                    "query": echo,
                    "note": "No logs found matching the query. Try different search terms, a broader time range, or check the source name.",
                }),
                DEFAULT_JSON_LIMIT,
            ));
        }

        let entries: Vec<Value> = data.iter().take(max_results as usize).map(trim_entry).collect();
        Ok(safe_json(
            &json!({
                "total_results": data.len(),
                "showing": entries.len(),
                "query": echo,
                "logs": entries,
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

fn trim_entry(entry: &Value) -> Value {
    match entry {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), trim_field(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::String(s) => json!(truncate_chars(s, MAX_FIELD_CHARS)),
        other => json!(truncate_chars(&other.to_string(), MAX_FIELD_CHARS)),
    }
}

fn trim_field(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_FIELD_CHARS => {
            json!(format!("{}...", truncate_chars(s, MAX_FIELD_CHARS)))
        }
        other => other.clone(),
    }
}
