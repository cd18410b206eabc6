//! The store abstraction and backend selection.

use std::path::Path;
use std::sync::Arc;

use parley_settings::{HistoryBackend, HistorySettings};
use tracing::info;

use crate::errors::Result;
use crate::memory::MemoryHistory;
use crate::record::HistoryRecord;
use crate::sqlite::{ConnectionConfig, SqliteHistory};

/// Bounded, ordered log of [`HistoryRecord`]s.
///
/// Implementations guarantee:
/// - at most [`capacity`](Self::capacity) records are retained, oldest
///   evicted first;
/// - `append` and the read operations are mutually atomic;
/// - after [`close`](Self::close), every other operation returns
///   [`HistoryError::Closed`](crate::HistoryError::Closed).
pub trait HistoryStore: Send + Sync {
    /// Append a record, evicting the oldest if full.
    fn append(&self, record: HistoryRecord) -> Result<()>;

    /// The last `min(n, len)` records, oldest first.
    fn tail(&self, n: usize) -> Result<Vec<HistoryRecord>>;

    /// Every retained record, oldest first.
    fn history(&self) -> Result<Vec<HistoryRecord>>;

    /// Number of retained records.
    fn len(&self) -> Result<usize>;

    /// Whether no records are retained.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Maximum number of retained records.
    fn capacity(&self) -> usize;

    /// Release resources. Idempotent.
    fn close(&self);
}

/// Open the backend named by `settings`.
pub fn open_history(settings: &HistorySettings) -> Result<Arc<dyn HistoryStore>> {
    let store: Arc<dyn HistoryStore> = match (settings.backend, &settings.sqlite_path) {
        (HistoryBackend::Memory, _) => Arc::new(MemoryHistory::new(settings.capacity)),
        (HistoryBackend::Sqlite, Some(path)) => Arc::new(SqliteHistory::open_file(
            Path::new(path),
            settings.capacity,
            &ConnectionConfig::default(),
        )?),
        (HistoryBackend::Sqlite, None) => {
            Arc::new(SqliteHistory::open_in_memory(settings.capacity)?)
        }
    };
    info!(
        backend = ?settings.backend,
        capacity = store.capacity(),
        "history store opened"
    );
    Ok(store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_memory_backend_by_default() {
        let store = open_history(&HistorySettings::default()).unwrap();
        assert_eq!(store.capacity(), 1_000_000);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn opens_sqlite_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let settings = HistorySettings {
            backend: HistoryBackend::Sqlite,
            capacity: 2,
            sqlite_path: Some(dir.path().join("h.db").display().to_string()),
            ..HistorySettings::default()
        };
        let store = open_history(&settings).unwrap();
        for m in ["a", "b", "c"] {
            store.append(HistoryRecord::new("carol", m)).unwrap();
        }
        let tail = store.tail(10).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].message, "c");
    }

    #[test]
    fn opens_sqlite_in_memory_without_path() {
        let settings = HistorySettings {
            backend: HistoryBackend::Sqlite,
            ..HistorySettings::default()
        };
        let store = open_history(&settings).unwrap();
        store.append(HistoryRecord::new("dave", "x")).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }
}
