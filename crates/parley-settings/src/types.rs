//! Settings types.
//!
//! Every struct deserializes with `#[serde(default)]` so a partial user file
//! only needs to name the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// HTTP listener and hub settings.
    pub server: ServerSettings,
    /// Per-connection pump timings.
    pub pumps: PumpSettings,
    /// Message history settings.
    pub history: HistorySettings,
    /// Login and token settings.
    pub auth: AuthSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl ParleySettings {
    /// Reject combinations that would leave the server unable to run.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.queue_capacity == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "server.queueCapacity must be > 0".into(),
            ));
        }
        if self.server.hub_command_capacity == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "server.hubCommandCapacity must be > 0".into(),
            ));
        }
        if self.history.capacity == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "history.capacity must be > 0".into(),
            ));
        }
        if self.pumps.ping_period_secs >= self.pumps.pong_wait_secs {
            return Err(crate::SettingsError::InvalidValue(format!(
                "pumps.pingPeriodSecs ({}) must be shorter than pumps.pongWaitSecs ({})",
                self.pumps.ping_period_secs, self.pumps.pong_wait_secs
            )));
        }
        if self.pumps.max_batch == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "pumps.maxBatch must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener and hub settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Base URL handed to clients in login responses (`ws://host:port`).
    /// Derived from `host`/`port` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Largest inbound frame accepted on a connection, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per participant.
    pub queue_capacity: usize,
    /// Depth of the hub's command channel.
    pub hub_command_capacity: usize,
    /// Value advertised in the `X-Rate-Limit` login header.
    pub rate_limit: u32,
    /// How long shutdown waits for participants to leave.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_url: None,
            max_message_size: 512,
            queue_capacity: 256,
            hub_command_capacity: 1024,
            rate_limit: 100,
            shutdown_grace_secs: 10,
        }
    }
}

/// Per-connection pump timings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PumpSettings {
    /// Read deadline, renewed on every pong.
    pub pong_wait_secs: u64,
    /// Interval between pings. Must be shorter than `pong_wait_secs`.
    pub ping_period_secs: u64,
    /// Deadline for flushing a batch of frames.
    pub write_wait_secs: u64,
    /// Deadline for sending a ping.
    pub ping_write_wait_secs: u64,
    /// Most frames coalesced into a single flush.
    pub max_batch: usize,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            pong_wait_secs: 60,
            ping_period_secs: 50,
            write_wait_secs: 10,
            ping_write_wait_secs: 3,
            max_batch: 64,
        }
    }
}

/// Storage backend for message history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// Process-local ring buffer.
    #[default]
    Memory,
    /// `SQLite` table, file-backed or in-memory.
    Sqlite,
}

/// Message history settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Which store to use.
    pub backend: HistoryBackend,
    /// Most records retained before the oldest is evicted.
    pub capacity: usize,
    /// Records replayed to a participant when it joins.
    pub replay_len: usize,
    /// Database file for the `sqlite` backend. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::Memory,
            capacity: 1_000_000,
            replay_len: 10,
            sqlite_path: None,
        }
    }
}

/// Digest used for stored credentials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256.
    #[default]
    Sha256,
    /// SHA-512.
    Sha512,
}

/// Login and token settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Lifetime of a one-time connect token.
    pub token_ttl_secs: u64,
    /// Random bytes per token before encoding.
    pub token_bytes: usize,
    /// Credential digest.
    pub hash_algorithm: HashAlgorithm,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_ttl_secs: 180,
            token_bytes: 64,
            hash_algorithm: HashAlgorithm::Sha256,
        }
    }
}

/// Log line format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Write to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
