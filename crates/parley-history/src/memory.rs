//! Process-local ring buffer.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::errors::{HistoryError, Result};
use crate::record::HistoryRecord;
use crate::store::HistoryStore;

/// Bounded FIFO of records behind one lock.
///
/// `None` inside the lock means the store has been closed.
pub struct MemoryHistory {
    capacity: usize,
    records: Mutex<Option<VecDeque<HistoryRecord>>>,
}

impl MemoryHistory {
    /// Create an empty store. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(Some(VecDeque::new())),
        }
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, record: HistoryRecord) -> Result<()> {
        let mut guard = self.records.lock();
        let records = guard.as_mut().ok_or(HistoryError::Closed)?;
        while records.len() >= self.capacity {
            let _ = records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    fn tail(&self, n: usize) -> Result<Vec<HistoryRecord>> {
        let guard = self.records.lock();
        let records = guard.as_ref().ok_or(HistoryError::Closed)?;
        let skip = records.len().saturating_sub(n);
        Ok(records.iter().skip(skip).cloned().collect())
    }

    fn history(&self) -> Result<Vec<HistoryRecord>> {
        let guard = self.records.lock();
        let records = guard.as_ref().ok_or(HistoryError::Closed)?;
        Ok(records.iter().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        let guard = self.records.lock();
        guard.as_ref().map(VecDeque::len).ok_or(HistoryError::Closed)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        let _ = self.records.lock().take();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
