use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facewise_core::encoder::annotate;
use facewise_core::{
    encode_file, frame, Config, EncodeError, Encoding, FaceStore, OnnxPipeline, Recognizer, Reply,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "facewise", about = "Facewise face registration and recognition CLI")]
struct Cli {
    /// Face database; defaults to the configured `db_path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode the single face in an image and print it as JSON
    Encode {
        image: PathBuf,
        name: String,
        /// Also write `<stem>_verified.<ext>` with the face outlined
        #[arg(long)]
        annotate: bool,
    },
    /// Encode a face and store it under NAME
    Register { image: PathBuf, name: String },
    /// List registered faces
    List,
    /// Remove a registered face
    Remove {
        /// Face ID to remove
        id: i64,
    },
    /// Recognize every face in an image against the registered faces
    Recognize { image: PathBuf },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("loading configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Encode { image, name, annotate } => encode(&config, &image, &name, annotate),
        Commands::Register { image, name } => register(&config, &image, &name),
        Commands::List => {
            let faces = FaceStore::open_existing(&config.db_path)?.summaries()?;
            print_json(&faces)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remove { id } => {
            let removed = FaceStore::open_existing(&config.db_path)?.remove(id)?;
            print_json(&json!({ "id": id, "removed": removed }))?;
            Ok(if removed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Recognize { image } => recognize(&config, &image),
    }
}

fn load_pipeline(config: &Config) -> Result<OnnxPipeline> {
    OnnxPipeline::load(&config.detector_model_path(), &config.embedder_model_path())
        .context("loading face models")
}

fn encode(config: &Config, image: &Path, name: &str, with_annotation: bool) -> Result<ExitCode> {
    if !image.exists() {
        return print_error(&EncodeError::ImageNotFound);
    }
    let mut pipeline = load_pipeline(config)?;
    match encode_file(&mut pipeline, image, name) {
        Ok(face) => {
            if with_annotation {
                if let Err(err) = annotate(image, &face.location) {
                    tracing::warn!(error = %err, "could not write verification image");
                }
            }
            print_json(&face)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => print_error(&err),
    }
}

fn register(config: &Config, image: &Path, name: &str) -> Result<ExitCode> {
    if !image.exists() {
        return print_error(&EncodeError::ImageNotFound);
    }
    let mut pipeline = load_pipeline(config)?;
    let face = match encode_file(&mut pipeline, image, name) {
        Ok(face) => face,
        Err(err) => return print_error(&err),
    };

    let store = FaceStore::open(&config.db_path)?;
    let record = store.insert(&face.name, &Encoding::new(face.encoding))?;
    tracing::info!(id = record.id, name = %record.name, "face registered");
    print_json(&json!({ "id": record.id, "name": record.name, "timestamp": record.timestamp }))?;
    Ok(ExitCode::SUCCESS)
}

fn recognize(config: &Config, image: &Path) -> Result<ExitCode> {
    let frame = match frame::load_path(image) {
        Ok(frame) => frame,
        Err(err) => return print_error(&EncodeError::from(err)),
    };

    let mut recognizer = Recognizer::new(load_pipeline(config)?, config.recognizer_config());
    let known = recognizer.load_known_faces(&FaceStore::open_existing(&config.db_path)?)?;
    tracing::info!(known, "known faces loaded");

    let reply = match recognizer.recognize(&frame) {
        Ok(recognition) => Reply::from(recognition),
        Err(err) => Reply::error(err.to_string()),
    };
    println!("{}", reply.to_line());
    Ok(match reply {
        Reply::Error { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_error(err: &EncodeError) -> Result<ExitCode> {
    tracing::error!(error = %err, "encoding failed");
    print_json(&json!({ "error": err.to_string() }))?;
    Ok(ExitCode::FAILURE)
}
