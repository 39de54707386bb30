use clap::{Parser, Subcommand};
use ddgchat::config::Config;
use ddgchat::server;
use ddgchat::util::init_tracing;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "ddgchat", version, about = "OpenAI-compatible API in front of DuckDuckGo chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a TOML config file and start the HTTP server.
    Run {
        /// Path to the config file.
        config: PathBuf,
    },
    /// Print version information.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("{}", env!("CARGO_PKG_NAME"));
            println!("{}", env!("CARGO_PKG_DESCRIPTION"));
            println!("version: {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::Run { config } => {
            init_tracing();

            let config = match Config::load_from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("failed to load config: {e:#}");
                    return ExitCode::FAILURE;
                }
            };

            if config.tokens.is_empty() {
                tracing::info!("Auth mode: open (no bearer tokens configured)");
            } else {
                tracing::info!(tokens = config.tokens.len(), "Auth mode: bearer allow-list");
            }
            tracing::info!(
                models = config.model_mapping.len(),
                upstream = %config.api_base(),
                "config loaded"
            );

            match server::serve(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!("server error: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
