//! `triage tools`: List investigation capabilities.

use triage_config::AppConfig;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = triage_tools::default_registry(config.guardrails.tool_response_max_chars);

    println!("🧰 {} tools", registry.len());
    println!();
    for def in registry.definitions() {
        let summary = def.description.lines().next().unwrap_or_default();
        println!("   {:<26} {summary}", def.name);
    }
    Ok(())
}
