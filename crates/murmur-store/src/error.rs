use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Usernames are unique regardless of case.
    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    /// JSON column could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
