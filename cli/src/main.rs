// perolink: message relay gateway
//
// Accepts node connections on /ws, hands out the startup credential
// through a token file, and relays envelopes between nodes.

mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use perolink_core::relay::{AuthPolicy, AuthToken, Relay};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "perolink")]
#[command(about = "PeroLink envelope relay gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        #[arg(short, long)]
        port: Option<u16>,
        /// Interface to bind
        #[arg(short, long)]
        bind: Option<String>,
        /// Where to write the startup token
        #[arg(long)]
        token_file: Option<PathBuf>,
        /// Register nodes even if their token is wrong (compatibility only)
        #[arg(long)]
        allow_invalid_token: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            bind,
            token_file,
            allow_invalid_token,
        } => cmd_start(port, bind, token_file, allow_invalid_token).await,
        Commands::Config { action } => cmd_config(action).await,
    }
}

async fn cmd_start(
    port: Option<u16>,
    bind: Option<String>,
    token_file: Option<PathBuf>,
    allow_invalid_token: bool,
) -> Result<()> {
    let mut config = config::Config::load()?;
    if let Some(port) = port {
        config.listen_port = port;
    }
    if let Some(bind) = bind {
        config.bind_address = bind;
    }
    if allow_invalid_token {
        config.relay.enforce_auth = false;
    }
    let addr = config.listen_addr()?;

    let token = AuthToken::generate();
    let token_path = match token_file {
        Some(path) => path,
        None => config.token_path().context("Failed to resolve token file path")?,
    };
    // Companion processes read the token from here; the relay runs without it
    match token.persist(&token_path) {
        Ok(()) => tracing::info!("Token saved to {}", token_path.display()),
        Err(e) => tracing::warn!("Could not save token: {:#}", e),
    }

    let relay_config = config.relay_config();
    if relay_config.auth_policy == AuthPolicy::WarnOnly {
        tracing::warn!("Authentication is NOT enforced: nodes with a wrong token will be registered");
    }
    let relay = Arc::new(Relay::new(relay_config, token));

    println!("{}", "PeroLink Gateway starting...".bold());
    println!();
    println!("  {} WebSocket:  ws://{}/ws", "✓".green(), addr);
    println!("  {} Status:     http://{}/api/status", "✓".green(), addr);
    println!("  {} Token file: {}", "✓".green(), token_path.display().to_string().bright_cyan());
    println!();

    let start_time = Instant::now();
    tokio::select! {
        _ = server::serve(addr, relay.clone(), start_time) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutting down ({} nodes connected)", relay.registry().len());
        }
    }

    Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown or unset config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
