//! `triage serve`: Start the HTTP API server.

use triage_config::AppConfig;

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🔎 Triage Gateway");
    println!("   Listening:    {}:{}", config.gateway.host, config.gateway.port);
    println!("   Organization: {}", config.default_organization().id);
    println!(
        "   Guardrails:   {} AI calls, {} input tokens",
        config.guardrails.max_ai_calls, config.guardrails.max_input_tokens
    );

    triage_gateway::start(config).await?;

    Ok(())
}
