//! services/twin_data/src/error.rs
//!
//! The error returned by the binaries. Library operations return `PortError`;
//! this type only adds the failures that can happen while starting up.

use crate::config::ConfigError;
use twin_data_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum TwinDataError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A collaborator (search service, model deployment, store) rejected a call.
    #[error("Service port error: {0}")]
    Port(#[from] PortError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl TwinDataError {
    /// Whether retrying the same startup step may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TwinDataError::Port(e) => e.is_retryable(),
            TwinDataError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }
}
