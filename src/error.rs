//! Error types for inbox analysis.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Reasons an analyzer call produced no usable data.
///
/// These never cross the pipeline boundary as `Err`; they are rendered into
/// the `error` string of a failed outcome.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("{analyzer} timed out after {timeout:?}")]
    Timeout { analyzer: String, timeout: Duration },

    #[error("{analyzer} panicked: {message}")]
    Panicked { analyzer: String, message: String },

    #[error("{analyzer} is disabled")]
    Disabled { analyzer: String },
}
