use crate::recognition::RecognizerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Service configuration: optional TOML file, then `FACEWISE_*` overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detector file name inside `model_dir`.
    pub detector_model: String,
    /// 128-d embedding model file name inside `model_dir`.
    pub embedder_model: String,
    /// Confidence a match has to exceed.
    pub match_threshold: f32,
    /// Minimum milliseconds between processed frames.
    pub frame_interval_ms: u64,
    /// Frames are shrunk by this factor before detection.
    pub downscale: u32,
    pub chat: ChatSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// OpenAI-compatible API root.
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Documents retrieved for ordinary questions.
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            db_path: data_dir.join("faces.db"),
            model_dir: data_dir.join("models"),
            detector_model: "det_10g.onnx".to_string(),
            embedder_model: "face_encoder_128.onnx".to_string(),
            match_threshold: 0.6,
            frame_interval_ms: 100,
            downscale: 4,
            chat: ChatSettings::default(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.7,
            request_timeout_secs: 60,
            top_k: 3,
        }
    }
}

impl Config {
    /// Load from `FACEWISE_CONFIG` (or `$XDG_CONFIG_HOME/facewise/config.toml`
    /// when present), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("FACEWISE_CONFIG").ok().map(PathBuf::from);
        let path = explicit.or_else(|| {
            let default = config_dir().join("config.toml");
            default.exists().then_some(default)
        });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `FACEWISE_*` overrides. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEWISE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWISE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWISE_MATCH_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.match_threshold = v;
        }
        if let Some(v) = lookup("FACEWISE_FRAME_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.frame_interval_ms = v;
        }
        if let Some(v) = lookup("FACEWISE_DOWNSCALE").and_then(|v| v.parse().ok()) {
            self.downscale = v;
        }
        if let Some(v) = lookup("FACEWISE_OPENAI_BASE_URL") {
            self.chat.base_url = v;
        }
        if let Some(v) = lookup("FACEWISE_CHAT_MODEL") {
            self.chat.chat_model = v;
        }
        if let Some(v) = lookup("FACEWISE_EMBEDDING_MODEL") {
            self.chat.embedding_model = v;
        }
        if let Some(v) = lookup("FACEWISE_TOP_K").and_then(|v| v.parse().ok()) {
            self.chat.top_k = v;
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    pub fn recognizer_config(&self) -> RecognizerConfig {
        RecognizerConfig {
            threshold: self.match_threshold,
            min_interval: Duration::from_millis(self.frame_interval_ms),
            downscale: self.downscale.max(1),
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("facewise")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("facewise")
}
