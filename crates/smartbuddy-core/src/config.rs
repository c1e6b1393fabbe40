//! Persisted config (embedder, chunking, retrieval sizes) in the app data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::{ChunkError, ChunkPolicy, DEFAULT_STRIDE, DEFAULT_WINDOW_SIZE};
use crate::ollama::{DEFAULT_BASE_URL, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL};
use crate::service::RetrievalOptions;

const CONFIG_FILENAME: &str = "config.toml";

/// Chunks requested from the index per question.
pub const DEFAULT_FETCH_K: usize = 7;
/// Chunks that make it into the prompt context.
pub const DEFAULT_CONTEXT_CHUNKS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    Ollama,
    /// Offline feature hashing; no model needed.
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the index and sources live. Defaults to the app data directory.
    pub data_dir: Option<String>,
    pub embedder: EmbedderKind,
    pub ollama_url: String,
    pub embed_model: String,
    /// Must match what the embedding model produces.
    pub dimension: usize,
    pub window_size: usize,
    pub stride: usize,
    pub fetch_k: usize,
    pub context_chunks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            embedder: EmbedderKind::default(),
            ollama_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            window_size: DEFAULT_WINDOW_SIZE,
            stride: DEFAULT_STRIDE,
            fetch_k: DEFAULT_FETCH_K,
            context_chunks: DEFAULT_CONTEXT_CHUNKS,
        }
    }
}

impl Config {
    /// Check the values that can't be caught by the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        self.chunk_policy()?;
        Ok(())
    }

    pub fn chunk_policy(&self) -> Result<ChunkPolicy, ConfigError> {
        Ok(ChunkPolicy::new(self.window_size, self.stride)?)
    }

    pub fn retrieval_options(&self) -> Result<RetrievalOptions, ConfigError> {
        self.validate()?;
        Ok(RetrievalOptions {
            policy: self.chunk_policy()?,
            fetch_k: self.fetch_k,
            context_chunks: self.context_chunks,
        })
    }

    /// The configured data directory, or the app data directory.
    pub fn resolve_data_dir(&self) -> Option<PathBuf> {
        match self.data_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => Some(PathBuf::from(dir)),
            None => app_data::app_data_dir(),
        }
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    load_config_from(&data_dir.join(CONFIG_FILENAME))
}

/// Load config from an explicit file. Returns default config if missing or invalid.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(s) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    toml::from_str(&s).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
        Config::default()
    })
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    save_config_to(&data_dir.join(CONFIG_FILENAME), config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(ConfigError::Write)?;
    }
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Path of the config file, if the app data directory can be determined.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|d| d.join(CONFIG_FILENAME))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("embedding dimension must be positive")]
    ZeroDimension,
    #[error("invalid chunking settings: {0}")]
    Chunk(#[from] ChunkError),
}
