//! # Errors
//!
//! One error type, [`DbaiError`], is shared by every module. Its variants
//! follow the failure classes the assistant cares about:
//!
//! - [`DbaiError::Configuration`]: required settings are missing; raised before any I/O.
//! - [`DbaiError::Query`]: SQL failed against the connected database. Inside a turn
//!   the `executeQuery` tool turns this into text for the model instead of failing.
//! - [`DbaiError::Persistence`]: the conversation store could not read or write.
//! - [`DbaiError::Model`]: the language model call failed or answered nonsense.
//! - [`DbaiError::Snapshot`]: the schema snapshot file could not be parsed or written.

use async_openai::error::OpenAIError;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, DbaiError>;

#[derive(Debug, Error)]
pub enum DbaiError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("turn exceeded its {0}s time limit")]
    TurnTimedOut(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<diesel::result::Error> for DbaiError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => DbaiError::NotFound("record".to_string()),
            other => DbaiError::Persistence(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for DbaiError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        DbaiError::Persistence(err.to_string())
    }
}

impl From<sqlx::Error> for DbaiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbaiError::Query(db_err.message().to_string()),
            other => DbaiError::Query(other.to_string()),
        }
    }
}

impl From<OpenAIError> for DbaiError {
    fn from(err: OpenAIError) -> Self {
        DbaiError::Model(err.to_string())
    }
}

impl From<serde_yaml::Error> for DbaiError {
    fn from(err: serde_yaml::Error) -> Self {
        DbaiError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: DbaiError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, DbaiError::NotFound(_)));
    }

    #[test]
    fn test_sqlx_errors_map_to_query_errors() {
        let err: DbaiError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbaiError::Query(_)));
    }

    #[test]
    fn test_display_carries_the_class() {
        let err = DbaiError::Configuration("DB_NAME is not set".to_string());
        assert_eq!(err.to_string(), "configuration error: DB_NAME is not set");
        assert_eq!(
            DbaiError::TurnTimedOut(30).to_string(),
            "turn exceeded its 30s time limit"
        );
    }
}
