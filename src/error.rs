//! Error types for the filing paper trading engine.

use thiserror::Error;

/// Crate-wide error type.
///
/// Validation outcomes (quota denied, signal rejected, duplicate trade) are
/// NOT errors; they come back as structured results. Everything here is a
/// collaborator failure or a genuine logic error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("price lookup failed for {ticker}: {reason}")]
    Price { ticker: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("portfolio not found: {0}")]
    PortfolioNotFound(String),

    /// Uniqueness/atomicity guarantee was violated upstream. Should be
    /// unreachable; surfaced loudly rather than swallowed.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller may retry the operation (transient collaborator
    /// failure) as opposed to a logic error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Database(_) | EngineError::Price { .. } | EngineError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
