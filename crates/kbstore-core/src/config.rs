//! Store configuration and the optional settings file (`config.toml`).
//!
//! [StoreConfig] describes one store and is validated before any I/O happens.
//! [Settings] is what users put in a TOML file; it produces a [StoreConfig] per db name.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::ollama::{DEFAULT_BASE_URL, DEFAULT_BATCH_SIZE, DEFAULT_EMBED_MODEL};

const CONFIG_FILENAME: &str = "config.toml";

pub const DEFAULT_CHUNK_SIZE: usize = 4000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 300;
pub const DEFAULT_K: usize = 3;
/// Used when neither the settings file nor the app data dir gives a persistence root.
pub const FALLBACK_DB_PATH: &str = "vectorstores";
pub const DEFAULT_DOCS_ROOT: &str = "docs";

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_k() -> usize {
    DEFAULT_K
}

/// Options for one vector store. Immutable once handed to a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    knowledge_path: PathBuf,
    db_name: String,
    db_path: PathBuf,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    chunk_overlap: usize,
    #[serde(default = "default_k")]
    k: usize,
}

impl StoreConfig {
    pub fn new(
        knowledge_path: impl Into<PathBuf>,
        db_name: impl Into<String>,
        db_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            knowledge_path: knowledge_path.into(),
            db_name: db_name.into(),
            db_path: db_path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            k: DEFAULT_K,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Parse a single store definition from TOML and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a single store definition from a TOML file and validate it.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml_str(&s)
    }

    /// Checks every invariant without touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        if self.k == 0 {
            return Err(ConfigError::ZeroK);
        }
        validate_db_name(&self.db_name)
    }

    pub fn knowledge_path(&self) -> &Path {
        &self.knowledge_path
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// `<db_path>/<db_name>`: where the persisted index lives.
    pub fn index_path(&self) -> PathBuf {
        self.db_path.join(&self.db_name)
    }
}

/// The db name becomes a directory under db_path, so it must be exactly one normal component.
fn validate_db_name(name: &str) -> Result<(), ConfigError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == name && !name.starts_with('.') => Ok(()),
        _ => Err(ConfigError::InvalidDbName(name.to_string())),
    }
}

/// Contents of the settings file. Every field is optional; CLI flags override them.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Parent of the per-store knowledge folders (`<docs_root>/<db_name>`).
    pub docs_root: Option<PathBuf>,
    /// Where stores are persisted. Defaults to `<app data>/vectorstores`.
    pub db_path: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub k: Option<usize>,
    pub ollama: OllamaSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub url: String,
    pub model: String,
    pub batch_size: usize,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Settings {
    /// Build the store config for `db_name`. Not validated yet; the manager does that.
    pub fn store_config(&self, db_name: &str) -> StoreConfig {
        let docs_root = self
            .docs_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCS_ROOT));
        let db_path = self
            .db_path
            .clone()
            .or_else(app_data::default_db_path)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_DB_PATH));
        StoreConfig::new(docs_root.join(db_name), db_name, db_path)
            .with_chunk_size(self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE))
            .with_chunk_overlap(self.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP))
            .with_k(self.k.unwrap_or(DEFAULT_K))
    }
}

/// Load settings from an explicit TOML file.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    toml::from_str(&s).map_err(ConfigError::Parse)
}

/// Path of the settings file in the app data directory, if it can be determined.
pub fn default_settings_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Load settings from the app data directory. Returns defaults if the file is missing.
pub fn load_default_settings() -> Result<Settings, ConfigError> {
    match default_settings_path() {
        Some(path) if path.is_file() => load_settings(&path),
        _ => Ok(Settings::default()),
    }
}

/// Save settings to the app data directory. Returns the path written.
pub fn save_settings(settings: &Settings) -> Result<PathBuf, ConfigError> {
    let path = default_settings_path().ok_or(ConfigError::NoDataDir)?;
    save_settings_to(&path, settings)?;
    Ok(path)
}

/// Save settings to an explicit TOML file, replacing it if present.
pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(settings).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
    #[error("k must be greater than zero")]
    ZeroK,
    #[error("invalid db name {0:?}: must be a single, non-hidden path component")]
    InvalidDbName(String),
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
}
