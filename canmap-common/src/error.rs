//! Common error types for canmap

use thiserror::Error;

/// Common result type for canmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across canmap crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error (wraps serde_json::Error)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Edit addressed a table whose shape cannot accept it
    #[error("Table '{table}' is a {found} table, expected {expected}")]
    ShapeMismatch {
        table: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Row index past the largest row a table may grow to
    #[error("Row {row} is out of range (tables hold at most {limit} rows)")]
    RowOutOfRange { row: usize, limit: usize },
}
