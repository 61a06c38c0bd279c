use crate::error::ConfigError;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub triage: TriageConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Config {
    /// Load from the given path, or from the default workspace location.
    /// A missing file yields the defaults; a present but invalid file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if config_path.exists() {
            let raw = fs::read_to_string(&config_path)?;
            toml::from_str::<Self>(&raw).map_err(|e| ConfigError::Load(e.to_string()))?
        } else {
            Self::default()
        };
        config.config_path = config_path;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = UserDirs::new()
            .ok_or_else(|| ConfigError::Load("cannot determine home directory".into()))?;
        Ok(dirs.home_dir().join(".mailsift").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.triage.decision_threshold) {
            return Err(ConfigError::Validation(format!(
                "triage.decision_threshold must lie in [0, 1], got {}",
                self.triage.decision_threshold
            )));
        }
        if self.identity.email.trim().is_empty() {
            return Err(ConfigError::Validation(
                "identity.email must not be empty".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Validation(
                "embedding.dimensions must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ── Storage ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Directory holding the saved semantic index artifacts
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
}

impl StorageConfig {
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).into_owned())
    }

    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.index_dir).into_owned())
    }
}

fn default_database_path() -> String {
    "~/.mailsift/assistant.db".into()
}

fn default_index_dir() -> String {
    "~/.mailsift/index".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            index_dir: default_index_dir(),
        }
    }
}

// ── Triage ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Cutoff applied to every classification probability
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,
}

fn default_decision_threshold() -> f64 {
    0.5
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            decision_threshold: default_decision_threshold(),
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────

/// The sender identity used when a reviewed draft is materialized into an
/// outbound email. Explicit configuration, never read from ambient
/// environment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_name")]
    pub name: String,
    #[serde(default = "default_identity_email")]
    pub email: String,
}

fn default_identity_name() -> String {
    "Adrian".into()
}

fn default_identity_email() -> String {
    "example@example.com".into()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_identity_name(),
            email: default_identity_email(),
        }
    }
}

// ── Generation provider ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OpenAI-compatible endpoint base URL
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_model")]
    pub model: String,
    #[serde(default = "default_provider_temperature")]
    pub temperature: f64,
}

fn default_provider_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_provider_model() -> String {
    "gpt-4o-mini".into()
}

fn default_provider_temperature() -> f64 {
    0.2
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: None,
            model: default_provider_model(),
            temperature: default_provider_temperature(),
        }
    }
}

// ── Embeddings ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" for an API-backed embedder; anything else selects the
    /// deterministic local hash embedder
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "hash".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dimensions() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}
