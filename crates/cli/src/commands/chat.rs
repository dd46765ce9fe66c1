//! `triage chat`: Interactive or single-message investigation.
//!
//! Runs turns through the same [`ChatService`] the gateway uses, backed by an
//! in-memory store. Ctrl-C stops the running turn; the partial answer is
//! still printed.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use triage_agent::{ChatService, SendMessage, TurnEvent, TurnRunner};
use triage_config::AppConfig;
use triage_providers::AnthropicProvider;
use triage_store::InMemoryStore;

pub async fn run(config: AppConfig, message: Option<String>, trace: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    TRIAGE_API_KEY    = 'sk-ant-...'");
        eprintln!("    ANTHROPIC_API_KEY = 'sk-ant-...'");
        eprintln!();
        eprintln!("  Or add `model.api_key` / `model.api_key_helper` to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = Arc::new(AnthropicProvider::new(&config.model)?);
    let registry = Arc::new(triage_tools::default_registry(config.guardrails.tool_response_max_chars));
    let runner = TurnRunner::new(provider, registry, config.guardrails.clone(), config.services.clone())
        .with_temperature(config.model.temperature);

    let organization = config.default_organization();
    let org_id = organization.id.clone();
    let store = Arc::new(InMemoryStore::new());
    store.insert_organization(organization).await;
    let conversation_id = store.create_conversation(&org_id).await?;
    let chat = ChatService::new(runner, store, config.compaction.clone());

    if let Some(msg) = message {
        return send(&chat, &conversation_id, msg, trace).await;
    }

    println!();
    println!("  Triage — interactive investigation");
    println!();
    println!("  Model:        {}", config.model.model_id);
    println!("  Organization: {org_id}");
    println!(
        "  Guardrails:   {} AI calls, {} input tokens",
        config.guardrails.max_ai_calls, config.guardrails.max_input_tokens
    );
    println!();
    println!("  Type your question and press Enter. Ctrl+C stops a running investigation.");
    println!("  Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if let Err(e) = send(&chat, &conversation_id, line.to_string(), trace).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Send one message and render its events until the stream ends.
async fn send(
    chat: &ChatService,
    conversation_id: &str,
    content: String,
    trace: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let message = SendMessage { capture_full_trace: trace, ..SendMessage::new(content) };
    let mut rx = chat.send_message(conversation_id, message).await?;
    let mut renderer = Renderer::default();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => renderer.render(&event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !renderer.stop_requested => {
                renderer.stop_requested = true;
                eprintln!();
                eprintln!("  ⏹  Stopping after the current step...");
                chat.stop(conversation_id).await;
            }
        }
    }
    Ok(())
}

/// Terminal rendering of turn events.
#[derive(Default)]
struct Renderer {
    /// Text streamed since the last model call started
    printed: String,
    stop_requested: bool,
}

impl Renderer {
    fn render(&mut self, event: &TurnEvent) -> std::io::Result<()> {
        let mut out = std::io::stdout();
        match event {
            TurnEvent::Stats(stats) if stats.r#final => {
                eprintln!();
                eprintln!(
                    "  [{} AI calls, {} tools, {:.1}s, ~{} tokens]",
                    stats.ai_calls, stats.tool_calls, stats.elapsed_seconds, stats.estimated_tokens
                );
            }
            TurnEvent::Stats(_) => {
                if !self.printed.is_empty() {
                    writeln!(out)?;
                }
                self.printed.clear();
            }
            TurnEvent::Token { content } => {
                if self.printed.is_empty() {
                    write!(out, "\n  Assistant > ")?;
                }
                self.printed.push_str(content);
                write!(out, "{content}")?;
                out.flush()?;
            }
            TurnEvent::ToolStart { tool, tool_number, .. } => {
                eprintln!("  → #{tool_number} {tool}");
            }
            TurnEvent::ToolEnd { tool, result_length, duration_ms, is_error, .. } => {
                let marker = if *is_error { " (error)" } else { "" };
                eprintln!("  ← {tool}: {result_length} chars in {duration_ms} ms{marker}");
            }
            TurnEvent::Done { content } => {
                let rest = remaining_text(&self.printed, content);
                if !rest.is_empty() {
                    writeln!(out, "{rest}")?;
                }
            }
            TurnEvent::Error { error } => eprintln!("  [Error] {error}"),
            TurnEvent::Trace(trace) => {
                let json = serde_json::to_string_pretty(trace).unwrap_or_default();
                writeln!(out, "\n{json}")?;
            }
        }
        Ok(())
    }
}

/// The part of the final answer not already on screen.
fn remaining_text(printed: &str, content: &str) -> String {
    let printed = printed.trim_end();
    match content.strip_prefix(printed) {
        Some(rest) if !printed.is_empty() => rest.to_string(),
        _ => format!("\n  Assistant > {content}"),
    }
}
