//! Metrics Explorer capabilities.
//!
//! Discovery first: the overview reveals the dashboards an organization
//! actually uses, then dashboards are explored and finally queried.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::warn;
use triage_core::error::ToolError;
use triage_core::service::{Service, ServiceBackend, TurnContext};
use triage_core::tool::Tool;

use crate::format::{DEFAULT_JSON_LIMIT, compact_list, field, optional_str, required_str, round4, safe_json};

const SERVICE: Service = Service::MetricsExplorer;

fn org_prefix(backend: &dyn ServiceBackend) -> String {
    format!("/api/v1/organizations/{}", backend.org_id())
}

pub struct MetricsOverviewTool;

#[async_trait]
impl Tool for MetricsOverviewTool {
    fn name(&self) -> &str {
        "metrics_get_overview"
    }

    fn description(&self) -> &str {
        "Get the metrics organization overview including the list of important (used) dashboards. \
         ALWAYS call this first for metrics investigation. Returns org name, providers, and used dashboards with titles and IDs."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, ctx: &TurnContext, _args: Value) -> Result<String, ToolError> {
        let backend = ctx.backend(SERVICE)?;
        let prefix = org_prefix(backend.as_ref());
        let org = backend.get(&prefix, &[]).await?;

        let providers: Vec<Value> = org
            .get("providers")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .map(|p| json!({"type": field(p, "provider_type"), "name": field(p, "name"), "active": field(p, "is_active")}))
                    .collect()
            })
            .unwrap_or_default();
        let used_ids = org.get("used_dashboards").cloned().unwrap_or_else(|| json!([]));

        let mut result = Map::new();
        result.insert("org_name".into(), field(&org, "name"));
        result.insert("providers".into(), Value::Array(providers));
        result.insert("used_dashboard_ids".into(), used_ids.clone());

        if used_ids.as_array().is_some_and(|ids| !ids.is_empty()) {
            match backend.get(&format!("{prefix}/used-dashboards"), &[]).await {
                Ok(used) => {
                    let dashboards: Vec<Value> = used
                        .get("used_dashboards")
                        .and_then(Value::as_array)
                        .map(|list| {
                            list.iter()
                                .map(|d| {
                                    json!({
                                        "db_id": field(d, "id"),
                                        "provider_dashboard_id": field(d, "dashboard_id"),
                                        "title": field(d, "title"),
                                        "provider_type": field(d, "provider_type"),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    result.insert("used_dashboards".into(), Value::Array(dashboards));
                }
                Err(e) => {
                    warn!(error = %e, "Could not fetch used dashboard details");
                    result.insert("used_dashboards_error".into(), json!("Could not fetch used dashboard details"));
                }
            }
        }

        Ok(safe_json(&Value::Object(result), DEFAULT_JSON_LIMIT))
    }
}

pub struct MetricsSearchDashboardsTool;

#[async_trait]
impl Tool for MetricsSearchDashboardsTool {
    fn name(&self) -> &str {
        "metrics_search_dashboards"
    }

    fn description(&self) -> &str {
        "Search for dashboards by keyword. Space-separated terms are an OR search and * is a wildcard. \
         Examples: 'DynamoDB', 'fraud*', 'payment latency'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search": {"type": "string", "description": "Wildcard search pattern for dashboard titles"}
            },
            "required": ["search"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let search = required_str(&args, "search", SERVICE)?;
        let backend = ctx.backend(SERVICE)?;
        let result = backend
            .get(
                &format!("{}/dashboards/search", org_prefix(backend.as_ref())),
                &[("search", search.to_string())],
            )
            .await?;

        let dashboards = result.get("dashboards").and_then(Value::as_array).cloned().unwrap_or_default();
        let total = result.get("total_count").cloned().unwrap_or_else(|| json!(dashboards.len()));
        Ok(safe_json(
            &json!({
                "total_count": total,
                "dashboards": compact_list(&dashboards, &["id", "dashboard_id", "title", "provider_type"], 20),
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

pub struct MetricsExploreDashboardTool;

#[async_trait]
impl Tool for MetricsExploreDashboardTool {
    fn name(&self) -> &str {
        "metrics_explore_dashboard"
    }

    fn description(&self) -> &str {
        "Explore a dashboard: list its metrics and template variables. \
         Use the db_id (UUID) from metrics_get_overview or metrics_search_dashboards."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dashboard_db_id": {"type": "string", "description": "Database UUID of the dashboard (NOT the provider ID)"},
                "metric_search": {"type": "string", "description": "Optional wildcard to filter metrics (e.g. 'error*', 'latency')"}
            },
            "required": ["dashboard_db_id"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let dashboard = required_str(&args, "dashboard_db_id", SERVICE)?;
        let search = optional_str(&args, "metric_search").unwrap_or("*");
        let backend = ctx.backend(SERVICE)?;
        let prefix = org_prefix(backend.as_ref());

        let metrics_result = backend
            .get(
                &format!("{prefix}/dashboards/{dashboard}/metrics/search"),
                &[("search", search.to_string())],
            )
            .await?;
        let metrics = metrics_result.get("metrics").and_then(Value::as_array).cloned().unwrap_or_default();

        // Variables are best effort; a failure leaves the list empty.
        let variables = match backend
            .get(&format!("{prefix}/template-variables"), &[("dashboard_id", dashboard.to_string())])
            .await
        {
            Ok(raw) => summarize_variables(&raw),
            Err(e) => {
                warn!(dashboard = %dashboard, error = %e, "Could not list template variables");
                Vec::new()
            }
        };

        let enriched: Vec<Value> = metrics.iter().take(25).map(enrich_metric).collect();
        let total = metrics_result.get("total_count").cloned().unwrap_or_else(|| json!(metrics.len()));

        Ok(safe_json(
            &json!({
                "total_metrics": total,
                "metrics": enriched,
                "template_variables": variables,
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

/// Variables come either as a bare list or wrapped under `template_variables`/`data`.
fn summarize_variables(raw: &Value) -> Vec<Value> {
    let list = match raw {
        Value::Array(list) => list.as_slice(),
        Value::Object(obj) => obj
            .get("template_variables")
            .or_else(|| obj.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    list.iter()
        .map(|v| {
            let name = v
                .get("variable_name")
                .filter(|n| !n.is_null())
                .or_else(|| v.get("name"))
                .cloned()
                .unwrap_or(Value::Null);
            let value_count = v.get("values").and_then(Value::as_array).map_or(0, Vec::len);
            let total_values = if value_count > 0 { json!(value_count) } else { field(v, "total_count") };
            json!({
                "name": name,
                "tag_key": field(v, "tag_key"),
                "default_value": field(v, "default_value"),
                "total_values": total_values,
            })
        })
        .collect()
}

/// Compact one metric, surfacing the raw provider queries and the metric name
/// parsed from the first of them (`agg:metric.name{...}`).
fn enrich_metric(metric: &Value) -> Value {
    let mut entry = Map::new();
    entry.insert("id".into(), field(metric, "id"));
    entry.insert("display_name".into(), field(metric, "name"));
    entry.insert("description".into(), field(metric, "description"));

    let queries: Vec<&str> = metric
        .pointer("/details/requests")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|req| req.get("queries").and_then(Value::as_array))
        .flatten()
        .filter_map(|q| q.get("query").and_then(Value::as_str))
        .filter(|q| !q.is_empty())
        .collect();

    if let Some(first) = queries.first() {
        entry.insert("actual_queries".into(), json!(queries.iter().take(3).collect::<Vec<_>>()));
        if let Some(name) = parse_metric_name(first) {
            entry.insert("metric_name".into(), json!(name));
        }
    }
    Value::Object(entry)
}

fn parse_metric_name(query: &str) -> Option<&str> {
    if !query.contains('{') {
        return None;
    }
    let (_, rest) = query.split_once(':')?;
    rest.split('{').next()
}

pub struct MetricsVariableValuesTool;

#[async_trait]
impl Tool for MetricsVariableValuesTool {
    fn name(&self) -> &str {
        "metrics_get_variable_values"
    }

    fn description(&self) -> &str {
        "Get available values for a dashboard template variable. \
         Use this to discover which filter values exist before querying metrics."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dashboard_db_id": {"type": "string", "description": "Database UUID of the dashboard"},
                "variable_name": {"type": "string", "description": "Variable name (e.g. 'tablename', 'service', 'environment')"},
                "search": {"type": "string", "description": "Optional search to narrow high-cardinality variables"}
            },
            "required": ["dashboard_db_id", "variable_name"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let dashboard = required_str(&args, "dashboard_db_id", SERVICE)?;
        let variable = required_str(&args, "variable_name", SERVICE)?;
        let backend = ctx.backend(SERVICE)?;

        let mut query = Vec::new();
        if let Some(search) = optional_str(&args, "search") {
            query.push(("search", search.to_string()));
        }
        let result = backend
            .get(
                &format!("{}/dashboards/{dashboard}/variables/{variable}/values", org_prefix(backend.as_ref())),
                &query,
            )
            .await?;

        let values = result.get("values").and_then(Value::as_array).cloned().unwrap_or_default();
        let total = result.get("total_count").cloned().unwrap_or_else(|| json!(values.len()));
        let note = if values.len() > 50 {
            json!(format!("Showing first 50 of {total} values"))
        } else {
            Value::Null
        };

        Ok(safe_json(
            &json!({
                "variable_name": field(&result, "variable_name"),
                "tag_key": field(&result, "tag_key"),
                "default_value": field(&result, "default_value"),
                "total_count": field(&result, "total_count"),
                "returned_count": result.get("returned_count").cloned().unwrap_or_else(|| json!(values.len())),
                "values": values.iter().take(50).cloned().collect::<Vec<_>>(),
                "_note": note,
            }),
            DEFAULT_JSON_LIMIT,
        ))
    }
}

pub struct MetricsQueryTool;

#[async_trait]
impl Tool for MetricsQueryTool {
    fn name(&self) -> &str {
        "metrics_query"
    }

    fn description(&self) -> &str {
        "Execute a metric query against a dashboard. Use the provider dashboard ID (e.g. '4k2-qvg-h38') \
         from the dashboard search results, not the database UUID."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dashboard_provider_id": {"type": "string", "description": "Provider dashboard ID, NOT the database UUID"},
                "metric_name": {"type": "string", "description": "Full metric name (e.g. 'aws.dynamodb.consumed_read_capacity_units')"},
                "aggregation": {"type": "string", "description": "avg, sum, min, max, count, or last", "default": "avg"},
                "filters": {"type": "object", "description": "Tag filters (e.g. {\"service\": \"ccfraud\"})"},
                "group_by": {"type": "array", "items": {"type": "string"}, "description": "Tag keys to group results by"},
                "time_range": {"type": "string", "description": "Relative range: '15m', '1h', '4h', '24h', '7d'", "default": "1h"}
            },
            "required": ["dashboard_provider_id", "metric_name"]
        })
    }

    async fn invoke(&self, ctx: &TurnContext, args: Value) -> Result<String, ToolError> {
        let dashboard = required_str(&args, "dashboard_provider_id", SERVICE)?;
        let metric = required_str(&args, "metric_name", SERVICE)?;
        let aggregation = optional_str(&args, "aggregation").unwrap_or("avg");
        let time_range = optional_str(&args, "time_range").unwrap_or("1h");
        let backend = ctx.backend(SERVICE)?;

        let mut query = Map::new();
        query.insert("metric_name".into(), json!(metric));
        query.insert("aggregation".into(), json!(aggregation));
        if let Some(filters) = args.get("filters").filter(|f| f.as_object().is_some_and(|o| !o.is_empty())) {
            query.insert("filters".into(), filters.clone());
        }
        if let Some(group_by) = args.get("group_by").filter(|g| g.as_array().is_some_and(|a| !a.is_empty())) {
            query.insert("group_by".into(), group_by.clone());
        }

        let result = backend
            .post(
                &format!("/api/v1/dashboards/{dashboard}/query"),
                json!({"queries": [query], "time_range": {"relative": time_range}}),
                &[("X-Organization-Id", backend.org_id().to_string())],
            )
            .await?;

        Ok(safe_json(&summarize_query(&result), DEFAULT_JSON_LIMIT))
    }
}

fn summarize_query(result: &Value) -> Value {
    let mut output = Map::new();
    for key in ["dashboard_id", "provider", "execution_time_ms", "total_series", "total_datapoints"] {
        output.insert(key.into(), field(result, key));
    }

    for r in result.get("results").and_then(Value::as_array).into_iter().flatten() {
        output.insert("expression".into(), field(r, "expression"));
        let series: Vec<Value> = r
            .get("series")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(summarize_series)
            .collect();
        output.insert("series".into(), Value::Array(series));
    }
    Value::Object(output)
}

fn summarize_series(series: &Value) -> Value {
    let datapoints = series.get("datapoints").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    let values: Vec<f64> = datapoints.iter().filter_map(|dp| dp.get("value").and_then(Value::as_f64)).collect();

    let mut summary = Map::new();
    summary.insert("scope".into(), field(series, "scope"));
    summary.insert("tags".into(), field(series, "tags"));
    summary.insert("unit".into(), field(series, "unit"));
    summary.insert("datapoint_count".into(), json!(datapoints.len()));

    match (values.first(), values.last()) {
        (Some(_), Some(latest)) => {
            let sum: f64 = values.iter().sum();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            summary.insert("avg".into(), json!(round4(sum / values.len() as f64)));
            summary.insert("min".into(), json!(round4(min)));
            summary.insert("max".into(), json!(round4(max)));
            summary.insert("latest".into(), json!(round4(*latest)));

            let recent: Vec<Value> = datapoints[datapoints.len().saturating_sub(5)..]
                .iter()
                .map(|dp| {
                    json!({
                        "ts": field(dp, "timestamp"),
                        "val": dp.get("value").and_then(Value::as_f64).map(round4),
                    })
                })
                .collect();
            summary.insert("recent_datapoints".into(), Value::Array(recent));
        }
        _ => {
            summary.insert("note".into(), json!("No non-null datapoints in this series"));
        }
    }
    Value::Object(summary)
}
