//! Storage error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run {0} not found")]
    RunNotFound(String),
}

/// SQLite result codes the bulk writer treats as transient.
/// BUSY(5) and LOCKED(6) are contention; IOERR(10) covers interrupted I/O.
const TRANSIENT_SQLITE_CODES: &[&str] = &["5", "6", "10"];

impl StoreError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            StoreError::Sqlx(sqlx::Error::Io(_)) => true,
            StoreError::Sqlx(sqlx::Error::Database(db)) => db
                .code()
                .map(|code| TRANSIENT_SQLITE_CODES.contains(&code.as_ref()))
                .unwrap_or(false),
            _ => false,
        }
    }
}
