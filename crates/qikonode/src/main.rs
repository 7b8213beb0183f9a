//! qikonode - Qiko smart device agent
//!
//! Connects to the Bemfa broker, keeps the device subscribed and runs the
//! configured local action for every `on`/`off` command.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use qikonode::config::{AgentConfig, LogConfig, LogFormat};
use qikonode::{Agent, ConnectionManager, HeartbeatConfig, ShellActions, health};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "qikonode")]
#[command(about = "Qiko smart device agent for the Bemfa broker")]
#[command(version)]
struct Cli {
    /// Dotenv file to read (defaults to ./.env when present)
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device agent until interrupted
    Run {
        /// Serve the liveness endpoint on this address
        #[arg(long, env = "QIKO_HEALTH_ADDR")]
        health_addr: Option<SocketAddr>,
    },

    /// Print the resolved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AgentConfig::load(cli.env_file.as_deref())?;

    match cli.command {
        Commands::Run { health_addr } => {
            if health_addr.is_some() {
                config.health_addr = health_addr;
            }
            init_tracing(&config.log)?;
            run_agent(config).await?;
        }

        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "warn,qikonode={0},qiko_proto={0}",
            log.level
        ))
        .with_context(|| format!("invalid LOG_LEVEL {:?}", log.level))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
    Ok(())
}

async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    info!(
        endpoint = %config.endpoint,
        heartbeat_secs = config.heartbeat_interval_secs,
        "starting qikonode"
    );

    if config.endpoint.uid.is_empty() {
        warn!("BEMFA_UID is empty; the broker will not route commands to this device");
    }
    if config.endpoint.topic.is_empty() {
        warn!("BEMFA_TOPIC is empty; the broker will not route commands to this device");
    }

    let health_listener = match config.health_addr {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind health endpoint on {addr}"))?,
        ),
        None => None,
    };

    let connection = Arc::new(ConnectionManager::new(config.endpoint.clone())?);
    let heartbeat = HeartbeatConfig {
        interval: config.heartbeat_interval(),
        ..HeartbeatConfig::default()
    };

    let agent = Agent::new(
        Arc::clone(&connection),
        Arc::new(ShellActions::new(&config.actions)),
    )
    .with_heartbeat_config(heartbeat)
    .start()
    .await
    .context("failed to connect to broker")?;

    let health_shutdown = CancellationToken::new();
    let health_task = health_listener.map(|listener| {
        let shutdown = health_shutdown.clone();
        tokio::spawn(health::serve_health(
            listener,
            Arc::clone(&connection),
            async move { shutdown.cancelled().await },
        ))
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");

    agent.stop().await;
    health_shutdown.cancel();

    if let Some(task) = health_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "health endpoint failed"),
            Err(e) => error!(error = %e, "health endpoint task panicked"),
        }
    }

    info!("qikonode stopped");
    Ok(())
}
