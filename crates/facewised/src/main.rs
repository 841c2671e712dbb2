use anyhow::{bail, Context, Result};
use clap::Parser;
use facewise_core::{Config, OnnxPipeline};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod engine;
mod server;

#[derive(Parser)]
#[command(name = "facewised", about = "Facewise recognition server (JSON lines on stdin/stdout)")]
struct Args {
    /// Face database; defaults to the configured `db_path`
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::load().context("loading configuration")?;
    if let Some(path) = args.db_path {
        config.db_path = path;
    }

    if !config.db_path.exists() {
        bail!("database file not found: {}", config.db_path.display());
    }

    tracing::info!(db = %config.db_path.display(), "facewised starting");

    let pipeline = OnnxPipeline::load(&config.detector_model_path(), &config.embedder_model_path())
        .context("loading face models")?;
    let engine = engine::spawn_engine(pipeline, config.recognizer_config(), config.db_path.clone())?;

    tracing::info!("facewised ready");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = server::serve(&engine, stdin, stdout) => result?,
        _ = shutdown_signal() => {}
    }

    tracing::info!("facewised shutting down");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
