//! HTTP API gateway for Triage.
//!
//! A thin surface over [`ChatService`]: health checks and the v1 API, whose
//! message endpoint streams turn events as server-sent events.
//!
//! Built on Axum.

pub mod api_v1;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Router, http::Method, http::header, response::Json, routing::get};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use triage_agent::{ChatService, TurnRunner};
use triage_config::AppConfig;
use triage_providers::AnthropicProvider;
use triage_store::InMemoryStore;

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(api_state: api_v1::SharedApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(api_state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Build the shared state from configuration.
///
/// The configured organization becomes the default tenant of an in-memory
/// store.
pub async fn build_state(config: &AppConfig) -> Result<api_v1::SharedApiState, Box<dyn std::error::Error>> {
    let provider = Arc::new(AnthropicProvider::new(&config.model)?);
    let registry = Arc::new(triage_tools::default_registry(config.guardrails.tool_response_max_chars));
    let runner = TurnRunner::new(provider, registry, config.guardrails.clone(), config.services.clone())
        .with_temperature(config.model.temperature);

    let organization = config.default_organization();
    let default_organization = organization.id.clone();
    let store = Arc::new(InMemoryStore::new());
    store.insert_organization(organization).await;

    let chat = ChatService::new(runner, store.clone(), config.compaction.clone());
    Ok(Arc::new(api_v1::ApiV1State { chat, store, default_organization }))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let app = build_router(build_state(&config).await?);

    info!(
        addr = %addr,
        max_ai_calls = config.guardrails.max_ai_calls,
        max_input_tokens = config.guardrails.max_input_tokens,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
