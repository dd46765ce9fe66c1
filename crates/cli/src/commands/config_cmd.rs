//! `triage config`: Configuration management.

use triage_config::{AppConfig, ConfigError};
use triage_core::service::Service;

pub async fn run(init: bool, loaded: Result<AppConfig, ConfigError>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");

    if init {
        if config_path.exists() {
            println!("   Config already exists: {}", config_path.display());
            return Ok(());
        }
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("   ✅ Wrote {}", config_path.display());
        return Ok(());
    }

    println!("🔍 {}", config_path.display());
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };

    if !config.has_api_key() {
        println!("   ⚠️  No API key set (set TRIAGE_API_KEY or ANTHROPIC_API_KEY)");
    }

    let org = config.default_organization();
    let g = &config.guardrails;
    println!();
    println!("   Model:        {} ({:?})", config.model.model_id, config.model.flavor);
    println!("   Endpoint:     {}", config.model.base_url);
    println!("   Organization: {}", org.id);
    println!(
        "   Guardrails:   {} AI calls, {} input tokens, recursion {}, {} chars/tool",
        g.max_ai_calls, g.max_input_tokens, g.recursion_limit, g.tool_response_max_chars
    );
    println!(
        "   Compaction:   summarize from {} messages, keep {}",
        config.compaction.min_messages_for_summary, config.compaction.recent_message_count
    );
    for service in Service::ALL {
        let mapping = org.services.get(service);
        let url = mapping
            .base_url()
            .unwrap_or_else(|| config.services.default_url(service).to_string());
        let state = if mapping.org_id().is_some() { "mapped" } else { "not mapped" };
        println!("   {:<16}{url} ({state})", format!("{service}:"));
    }
    println!("   Gateway:      {}:{}", config.gateway.host, config.gateway.port);

    Ok(())
}
