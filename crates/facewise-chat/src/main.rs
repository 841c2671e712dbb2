use anyhow::{Context, Result};
use clap::Parser;
use facewise_chat::session::{serve, write_reply};
use facewise_chat::{ChatRag, OpenAiClient};
use facewise_core::{Config, Reply};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facewise-chat", about = "Ask questions about registered faces (JSON lines on stdin/stdout)")]
struct Args {
    /// Face database; falls back to `FACEWISE_DB_PATH`
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut stdout = tokio::io::stdout();

    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            tracing::error!("OPENAI_API_KEY is not set");
            write_reply(&mut stdout, &Reply::error("API key is missing. Please contact the administrator.")).await?;
            std::process::exit(1);
        }
    };

    let args = Args::parse();
    let Some(db_path) = resolve_db_path(args.db_path, |key| std::env::var_os(key)) else {
        tracing::error!("no database path given; pass DB_PATH or set FACEWISE_DB_PATH");
        write_reply(
            &mut stdout,
            &Reply::system("Chat system failed to start. Please contact the administrator."),
        )
        .await?;
        std::process::exit(1);
    };
    let mut config = Config::load().context("loading configuration")?;
    config.db_path = db_path;

    if !config.db_path.exists() {
        tracing::error!(db = %config.db_path.display(), "database file not found");
        write_reply(&mut stdout, &Reply::system("Chat system failed to start. Database not found.")).await?;
        std::process::exit(1);
    }

    write_reply(
        &mut stdout,
        &Reply::system(format!("Initializing chat system with database: {}", config.db_path.display())),
    )
    .await?;

    let client = OpenAiClient::new(api_key, &config.chat).context("building API client")?;
    let mut rag = ChatRag::new(
        config.db_path.clone(),
        Box::new(client.clone()),
        Box::new(client),
        config.chat.top_k,
    );

    let status = rag.load_data().await;
    tracing::info!(?status, "face data loaded");
    if let Some(message) = status.message() {
        write_reply(&mut stdout, &Reply::system(message)).await?;
    }

    let ready = if rag.has_data() {
        "Chat system is ready. You can ask questions about registered faces."
    } else {
        "Chat system initialized, but no face data is available. Please register faces first."
    };
    write_reply(&mut stdout, &Reply::system(ready)).await?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(&mut rag, stdin, stdout).await?;
    Ok(())
}

/// The database comes from the argument or `FACEWISE_DB_PATH`, never from a
/// built-in default.
fn resolve_db_path(arg: Option<PathBuf>, env: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    arg.or_else(|| env("FACEWISE_DB_PATH").filter(|v| !v.is_empty()).map(PathBuf::from))
}
