//! Moodbot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use moodbot::agent::Engine;
use moodbot::config::Config;
use moodbot::db::Db;
use moodbot::llm::{Generator, HttpGenerator};
use moodbot::messaging::ConsoleTransport;

#[derive(Parser)]
#[command(name = "moodbot")]
#[command(about = "A group chat persona with memory and moods")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration from environment")?,
    };
    tracing::info!(data_dir = %config.data_dir.display(), persona = %config.persona.name, "configuration loaded");

    let db = Db::connect(&config.data_dir)
        .await
        .context("failed to open database")?;

    let timeout = std::time::Duration::from_secs(config.behavior.generation_timeout_secs);
    let generator = HttpGenerator::from_config(&config.generation, timeout)
        .context("failed to build generation client")?
        .map(|generator| Arc::new(generator) as Arc<dyn Generator>);
    if generator.is_none() {
        tracing::info!("no generation endpoint configured, replies come from fallback patterns");
    }

    let transport = Arc::new(ConsoleTransport::new(config.persona.name.clone()));
    let deps = moodbot::AgentDeps::new(config, db.sqlite.clone(), generator)
        .context("failed to initialize engine")?;
    let engine = Engine::new(deps, transport);

    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.shutdown();
        }
    });

    let result = engine.run().await;
    db.close().await;
    result.context("engine stopped with an error")?;

    tracing::info!("moodbot stopped");
    Ok(())
}
