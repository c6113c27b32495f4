//! Switchboard CLI - serve the protocol or query the router from a shell

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::gateway::HttpResponderClient;
use switchboard_core::orchestration::{OrchestrationRequest, Orchestrator};
use switchboard_core::registry::ResponderRegistry;
use switchboard_core::server::{Server, StdioTransport};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Route conversations to specialist responders", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; defaults to ./switchboard.toml plus SWITCHBOARD_ overrides
    #[arg(short, long, global = true, env = "SWITCHBOARD_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve newline-delimited JSON commands on stdin/stdout
    Serve,
    /// Send one message and print the response as JSON
    Ask {
        /// Session identifier
        #[arg(short, long, default_value = "cli")]
        session: String,
        /// Fan out to several responders and merge their answers
        #[arg(long, conflicts_with = "responder")]
        synthesize: bool,
        /// Route to this responder regardless of keywords
        #[arg(short, long)]
        responder: Option<String>,
        /// Responders to consult with --synthesize
        #[arg(long, value_delimiter = ',', requires = "synthesize")]
        subset: Vec<String>,
        /// Message text
        message: String,
    },
    /// Show which responder a message would be routed to
    Route {
        /// Message text
        message: String,
    },
    /// List configured responders
    Responders,
    /// Version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<SwitchboardConfig> {
    let config = match path {
        Some(path) => SwitchboardConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SwitchboardConfig::load().context("loading configuration")?,
    };
    Ok(config)
}

fn build_orchestrator(config: &SwitchboardConfig) -> Result<Orchestrator> {
    let registry = ResponderRegistry::from_configs(config.responders.clone())?;
    let client = HttpResponderClient::from_registry(config.client.clone(), &registry)?;
    Ok(Orchestrator::from_config(config, Arc::new(client))?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries protocol replies
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
            println!("switchboard-core {}", switchboard_core::VERSION);
        }
        Commands::Serve => {
            let config = load_config(cli.config.as_ref())?;
            let orchestrator = Arc::new(build_orchestrator(&config)?);
            let cancel = CancellationToken::new();
            let sweeper = orchestrator.spawn_sweeper(cancel.clone());

            let server = Server::new(orchestrator);
            let result = server.run(&mut StdioTransport::new()).await;

            cancel.cancel();
            if let Err(e) = sweeper.await {
                tracing::warn!("Session sweeper ended abnormally: {}", e);
            }
            result?;
        }
        Commands::Ask {
            session,
            synthesize,
            responder,
            subset,
            message,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let orchestrator = build_orchestrator(&config)?;

            let mut request = if synthesize {
                OrchestrationRequest::synthesize(session, message)
            } else {
                OrchestrationRequest::single(session, message)
            };
            if let Some(key) = responder {
                request = request.with_responder(key);
            }
            if !subset.is_empty() {
                request = request.with_subset(subset);
            }

            print_json(&orchestrator.handle(request).await?)?;
        }
        Commands::Route { message } => {
            let config = load_config(cli.config.as_ref())?;
            let orchestrator = build_orchestrator(&config)?;
            print_json(&orchestrator.analyze(&message, None))?;
        }
        Commands::Responders => {
            let config = load_config(cli.config.as_ref())?;
            let orchestrator = build_orchestrator(&config)?;
            print_json(&orchestrator.responders())?;
        }
    }

    Ok(())
}
