//! # parley-history
//!
//! Bounded, append-only message history.
//!
//! - [`HistoryRecord`]: `{timestamp, name, message}`, immutable once stored
//! - [`HistoryStore`]: append, tail, full read, close
//! - [`MemoryHistory`]: `VecDeque` ring behind a mutex
//! - [`SqliteHistory`]: `SQLite` table trimmed on every insert
//! - [`open_history`]: picks a backend from settings

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;

pub use errors::{HistoryError, Result};
pub use memory::MemoryHistory;
pub use record::HistoryRecord;
pub use sqlite::SqliteHistory;
pub use store::{HistoryStore, open_history};
