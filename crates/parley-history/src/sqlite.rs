//! `SQLite`-backed history.
//!
//! Uses an `r2d2` pool over `r2d2_sqlite`. Each append inserts and trims in
//! one transaction, and every read is a single statement, so readers never
//! observe a half-applied append.
//!
//! Trimming deletes by id range: ids come from `AUTOINCREMENT` and only the
//! oldest rows are ever deleted, so live ids form one contiguous range.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, params};
use tracing::debug;

use crate::errors::{HistoryError, Result};
use crate::record::HistoryRecord;
use crate::store::HistoryStore;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS history (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    name      TEXT NOT NULL,
    message   TEXT NOT NULL
)";

/// Pool tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size for file databases. In-memory pools always use one
    /// connection, since each `SQLite` memory connection is its own database.
    pub pool_size: u32,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
    wal: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))?;
        if self.wal {
            // journal_mode returns a row, so it can't go through execute_batch
            let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        }
        Ok(())
    }
}

/// History stored in a `history` table, bounded to `capacity` rows.
pub struct SqliteHistory {
    capacity: usize,
    pool: Mutex<Option<ConnectionPool>>,
}

impl SqliteHistory {
    /// Open (creating if needed) a file database.
    pub fn open_file(path: &Path, capacity: usize, config: &ConnectionConfig) -> Result<Self> {
        debug!(path = %path.display(), capacity, "opening sqlite history");
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: config.busy_timeout_ms,
                wal: true,
            }))
            .build(SqliteConnectionManager::file(path))?;
        Self::with_pool(pool, capacity)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(capacity: usize) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: ConnectionConfig::default().busy_timeout_ms,
                wal: false,
            }))
            .build(SqliteConnectionManager::memory())?;
        Self::with_pool(pool, capacity)
    }

    fn with_pool(pool: ConnectionPool, capacity: usize) -> Result<Self> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self {
            capacity: capacity.max(1),
            pool: Mutex::new(Some(pool)),
        })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        // Clone the pool handle so the lock is not held during I/O.
        let pool = self.pool.lock().clone().ok_or(HistoryError::Closed)?;
        Ok(pool.get()?)
    }

    fn capacity_i64(&self) -> i64 {
        i64::try_from(self.capacity).unwrap_or(i64::MAX)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode(rows: Vec<(String, String, String)>) -> Result<Vec<HistoryRecord>> {
    rows.into_iter()
        .map(|(ts, name, message)| {
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| HistoryError::Corrupt(format!("bad timestamp `{ts}`: {e}")))?
                .with_timezone(&Utc);
            Ok(HistoryRecord {
                timestamp,
                name,
                message,
            })
        })
        .collect()
}

impl HistoryStore for SqliteHistory {
    fn append(&self, record: HistoryRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let _ = tx.execute(
            "INSERT INTO history (timestamp, name, message) VALUES (?1, ?2, ?3)",
            params![record.timestamp.to_rfc3339(), record.name, record.message],
        )?;
        let newest = tx.last_insert_rowid();
        let _ = tx.execute(
            "DELETE FROM history WHERE id <= ?1",
            params![newest.saturating_sub(self.capacity_i64())],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn tail(&self, n: usize) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, name, message FROM (
                 SELECT id, timestamp, name, message FROM history ORDER BY id DESC LIMIT ?1
             ) ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![limit], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        decode(rows)
    }

    fn history(&self) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT timestamp, name, message FROM history ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        decode(rows)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        let _ = self.pool.lock().take();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
