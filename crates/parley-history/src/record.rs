//! The unit of history.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// One chat message as stored and as sent on the wire.
///
/// Immutable once appended. `timestamp` has whole-second precision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Server receive time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Display name of the sender.
    pub name: String,
    /// Sanitized message text.
    pub message: String,
}

impl HistoryRecord {
    /// Build a record stamped with the current server time.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(Utc::now(), name, message)
    }

    /// Build a record with an explicit timestamp (truncated to seconds).
    pub fn at(
        timestamp: DateTime<Utc>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            name: name.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamp_truncated_to_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
            + chrono::Duration::milliseconds(750);
        let record = HistoryRecord::at(ts, "alice", "hi");
        assert_eq!(record.timestamp.timestamp_subsec_nanos(), 0);
        assert_eq!(record.timestamp.timestamp(), ts.timestamp());
    }

    #[test]
    fn serializes_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let record = HistoryRecord::at(ts, "alice", "hello there");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], "2024-05-01T12:30:15Z");
        assert_eq!(json["name"], "alice");
        assert_eq!(json["message"], "hello there");
    }
}
