//! Custom error types for rustpapers.
//!
//! All library functions return `Result<T, PaperError>`. The binary wraps
//! these in `anyhow` and maps them to an exit status with
//! [`PaperError::exit_code`].

use crate::models::Database;
use thiserror::Error;

/// Main error type for rustpapers operations.
#[derive(Debug, Error)]
pub enum PaperError {
    /// The boolean query could not be parsed
    #[error("Query error: {0}")]
    Query(String),

    /// A database tag that no adapter serves
    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    /// A search provider failed; the run continues without it
    #[error("Search failed for {database}: {message}")]
    Search {
        /// Database whose adapter failed
        database: Database,
        /// Underlying cause
        message: String,
    },

    /// Every configured database failed
    #[error("No configured database could be reached")]
    AllSourcesFailed,

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from API
        message: String,
    },

    /// Malformed provider payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metric table read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PaperError {
    /// Wrap any provider-side failure as a per-database search failure.
    pub fn search(database: Database, cause: impl std::fmt::Display) -> Self {
        PaperError::Search {
            database,
            message: cause.to_string(),
        }
    }

    /// Process exit code: 2 when no database answered, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            PaperError::AllSourcesFailed => 2,
            _ => 1,
        }
    }
}

/// Result type alias using `PaperError`
pub type Result<T> = std::result::Result<T, PaperError>;
