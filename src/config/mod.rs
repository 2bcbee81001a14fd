//! Configuration management for triage
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Issue tracker connection
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Similarity index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Suggestion configuration
    #[serde(default)]
    pub suggest: SuggestConfig,

    /// Sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Issue tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracker base URL (e.g. https://your-site.atlassian.net)
    #[serde(default = "default_tracker_base_url")]
    pub base_url: String,

    /// Account email for basic auth
    #[serde(default = "default_tracker_email")]
    pub email: String,

    /// Environment variable name holding the API token
    #[serde(default = "default_tracker_api_token_env")]
    pub api_token_env: String,

    /// Project key used by `sync` when no JQL is given
    #[serde(default = "default_tracker_project_key")]
    pub project_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_tracker_timeout")]
    pub timeout_secs: u64,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Embedding backend URL
    #[serde(default = "default_embedding_backend_url")]
    pub backend_url: String,
}

/// Lookup the expected embedding dimension for a known model
pub fn embedding_dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "BAAI/bge-small-en-v1.5" => Some(384),
        "BAAI/bge-base-en-v1.5" => Some(768),
        "BAAI/bge-large-en-v1.5" => Some(1024),
        "sentence-transformers/all-MiniLM-L6-v2" => Some(384),
        _ => None,
    }
}

impl EmbeddingConfig {
    /// Resolve the effective embedding dimension based on the configured model
    pub fn resolved_dimension(&self) -> usize {
        if let Some(expected) = embedding_dimension_for_model(&self.model) {
            if expected != self.dimension {
                warn!(
                    "Embedding dimension {} does not match model '{}' ({}); using {}",
                    self.dimension, self.model, expected, expected
                );
            }
            expected
        } else {
            self.dimension
        }
    }
}

/// Similarity index backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackendKind {
    /// In-process index, rebuilt from the tracker on each run
    Memory,
    /// Sqlite metadata plus an on-disk index snapshot
    Durable,
}

impl std::fmt::Display for IndexBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexBackendKind::Memory => write!(f, "memory"),
            IndexBackendKind::Durable => write!(f, "durable"),
        }
    }
}

impl FromStr for IndexBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(IndexBackendKind::Memory),
            "durable" => Ok(IndexBackendKind::Durable),
            _ => Err(Error::Config(format!("Unknown index backend: {}", s))),
        }
    }
}

/// Similarity index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index backend ("memory" or "durable")
    #[serde(default = "default_index_backend")]
    pub backend: String,
}

impl IndexConfig {
    pub fn backend_kind(&self) -> Result<IndexBackendKind> {
        self.backend.parse()
    }
}

/// Suggestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestConfig {
    /// Number of similar issues considered for suggestions
    #[serde(default = "default_suggest_neighbors")]
    pub neighbors: usize,

    /// Maximum labels to suggest
    #[serde(default = "default_suggest_max_labels")]
    pub max_labels: usize,

    /// Maximum components to suggest
    #[serde(default = "default_suggest_max_components")]
    pub max_components: usize,
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum issues fetched per sync run
    #[serde(default = "default_sync_max_issues")]
    pub max_issues: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for triage data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Path to the serialized index snapshot
    pub snapshot_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            suggest: SuggestConfig::default(),
            sync: SyncConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracker_base_url(),
            email: default_tracker_email(),
            api_token_env: default_tracker_api_token_env(),
            project_key: default_tracker_project_key(),
            timeout_secs: default_tracker_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            backend_url: default_embedding_backend_url(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
        }
    }
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            neighbors: default_suggest_neighbors(),
            max_labels: default_suggest_max_labels(),
            max_components: default_suggest_max_components(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_issues: default_sync_max_issues(),
        }
    }
}

impl Config {
    /// Get the default base directory for triage (~/.triage)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".triage")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("metadata.db"),
            snapshot_file: base.join("index.json"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Set up paths based on config file location
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("metadata.db"),
            snapshot_file: base.join("index.json"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_config_path())
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the tracker API token from environment
    pub fn tracker_api_token(&self) -> Option<String> {
        std::env::var(&self.tracker.api_token_env).ok()
    }

    /// Check if triage is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.index.backend_kind()?;

        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.suggest.neighbors == 0 {
            return Err(Error::Config(
                "suggest.neighbors must be at least 1".to_string(),
            ));
        }

        if self.sync.max_issues == 0 {
            return Err(Error::Config(
                "sync.max_issues must be at least 1".to_string(),
            ));
        }

        if self.tracker.timeout_secs == 0 {
            return Err(Error::Config(
                "tracker.timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
