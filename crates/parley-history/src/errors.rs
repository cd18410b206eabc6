//! Error types for the history stores.

use thiserror::Error;

/// Errors returned by [`HistoryStore`](crate::HistoryStore) operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// The store was closed.
    #[error("history store is closed")]
    Closed,

    /// A stored row could not be decoded.
    #[error("corrupt history row: {0}")]
    Corrupt(String),
}

/// Convenience alias for history results.
pub type Result<T> = std::result::Result<T, HistoryError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
