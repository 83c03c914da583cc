//! services/twin_data/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is resolved once at startup from environment variables
//! (the `.env` file is used for local development). Each component receives
//! its own section by value.

use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub diary_index_name: String,
    pub semistructured_index_name: String,
}

#[derive(Clone, Debug)]
pub struct AiConfig {
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub chat_model: String,
    pub vision_model: String,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub upload_concurrency: usize,
    pub indexing_max_retries: u32,
    pub indexing_retry_base: Duration,
    pub image_download_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: 5,
            indexing_max_retries: 5,
            indexing_retry_base: Duration::from_millis(500),
            image_download_timeout: Duration::from_secs(30),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: Level,
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub ai: AiConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Document Database ---
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
            max_connections: parse_number(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
        };

        // --- Search Service ---
        let search = SearchConfig {
            endpoint: required("SEARCH_ENDPOINT")?.trim_end_matches('/').to_string(),
            api_key: required("SEARCH_API_KEY")?,
            api_version: or_default("SEARCH_API_VERSION", "2024-07-01"),
            diary_index_name: or_default("DIARY_INDEX_NAME", "diary-analysis-index"),
            semistructured_index_name: or_default("SEMISTRUCTURED_INDEX_NAME", "semistructured-index"),
        };

        // --- Model Provider (API key optional until a model adapter is built) ---
        let ai = AiConfig {
            openai_api_key: lookup("OPENAI_API_KEY"),
            openai_api_base: lookup("OPENAI_API_BASE"),
            embedding_model: or_default("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimensions: parse_number(&lookup, "EMBEDDING_DIMENSIONS", 1536)?,
            chat_model: or_default("CHAT_MODEL", "gpt-4o-mini"),
            vision_model: or_default("VISION_MODEL", "gpt-4o"),
        };

        // --- Background Work ---
        let defaults = WorkerConfig::default();
        // Zero would stall every batch; one upload at a time is the floor.
        let upload_concurrency: usize = parse_number(&lookup, "UPLOAD_CONCURRENCY", defaults.upload_concurrency)?;
        let worker = WorkerConfig {
            upload_concurrency: upload_concurrency.max(1),
            indexing_max_retries: parse_number(&lookup, "INDEXING_MAX_RETRIES", defaults.indexing_max_retries)?,
            indexing_retry_base: Duration::from_millis(parse_number(&lookup, "INDEXING_RETRY_BASE_MS", 500u64)?),
            image_download_timeout: Duration::from_secs(parse_number(&lookup, "IMAGE_DOWNLOAD_TIMEOUT_SECS", 30u64)?),
        };

        Ok(Self { log_level, database, search, ai, worker })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
