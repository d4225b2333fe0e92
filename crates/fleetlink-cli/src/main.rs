//! Fleetlink CLI — runs the agent or center daemon, or speaks to a local
//! agent's control socket.

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleetlink_agent::Agent;
use fleetlink_center::Center;
use fleetlink_types::{AgentConfigStore, CenterConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::info;

use crate::cli::{Cli, Commands};

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Route tracing to the configured log file; stderr when the path is
/// empty or the file cannot be created.
fn init_tracing(log_path: &str) {
    if log_path.is_empty() {
        init_tracing_stderr();
        return;
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        Err(e) => {
            init_tracing_stderr();
            tracing::warn!(path = log_path, error = %e, "log file unavailable, using stderr");
        }
    }
}

async fn run_agent(config: PathBuf, sock: PathBuf) -> anyhow::Result<()> {
    let store = Arc::new(
        AgentConfigStore::load(&config)
            .with_context(|| format!("loading {}", config.display()))?,
    );
    init_tracing(&store.get().log_path);

    let agent = Agent::new(store, sock);
    agent.start().await.context("starting agent")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            info!("interrupt received");
            agent.stop();
        }
        _ = agent.stopped() => {
            info!("stopped via control socket");
        }
    }
    Ok(())
}

async fn run_center(config: PathBuf) -> anyhow::Result<()> {
    let cfg = CenterConfig::load(&config)
        .with_context(|| format!("loading {}", config.display()))?;
    init_tracing(&cfg.log_path);

    let center = Center::new(cfg);
    center.start().context("starting center")?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("interrupt received");
    center.stop();
    Ok(())
}

async fn run_ctl(sock: &Path, command: &[String]) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(sock)
        .await
        .with_context(|| format!("connecting to {}", sock.display()))?;
    let line = format!("{}\n", command.join(" "));
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    print!("{response}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Agent { config, sock } => run_agent(config, sock).await,
        Commands::Center { config } => run_center(config).await,
        Commands::Ctl { sock, command } => {
            init_tracing_stderr();
            run_ctl(&sock, &command).await
        }
    }
}
