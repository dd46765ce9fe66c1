//! Triage CLI: the main entry point.
//!
//! Commands:
//! - `chat`   : Interactive or single-message investigation
//! - `serve`  : Start the HTTP gateway
//! - `tools`  : List the investigation capabilities
//! - `config` : Show or initialize configuration

use clap::{Parser, Subcommand};
use triage_config::{AppConfig, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "triage",
    about = "Triage — guardrailed SRE investigation agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Print the full call/response/tool trace after each answer
        #[arg(long)]
        trace: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List investigation tools
    Tools,

    /// Show configuration, or write a default config file
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let logging = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    init_tracing(cli.verbose, &logging);

    match cli.command {
        Commands::Config { init } => commands::config_cmd::run(init, config).await?,
        Commands::Tools => commands::tools::run(&config?).await?,
        Commands::Chat { message, trace } => commands::chat::run(config?, message, trace).await?,
        Commands::Serve { port } => commands::serve::run(config?, port).await?,
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose`, then the configured level.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_flags() {
        let cli = Cli::try_parse_from(["triage", "chat", "-m", "why 500s?", "--trace"]).unwrap();
        match cli.command {
            Commands::Chat { message, trace } => {
                assert_eq!(message.as_deref(), Some("why 500s?"));
                assert!(trace);
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn parses_serve_port() {
        let cli = Cli::try_parse_from(["triage", "serve", "--port", "9000", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }

    #[test]
    fn parses_config_init() {
        let cli = Cli::try_parse_from(["triage", "config", "--init"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { init: true }));
    }
}
