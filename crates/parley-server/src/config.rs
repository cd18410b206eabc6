//! Server and pump configuration.

use std::time::Duration;

use parley_settings::ParleySettings;
use serde::{Deserialize, Serialize};

/// Listener, hub, and handoff configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port (0 = OS-assigned).
    pub port: u16,
    /// Base for login URLs. Falls back to the request `Host` header.
    pub public_url: Option<String>,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per participant.
    pub queue_capacity: usize,
    /// Depth of the hub command channel.
    pub hub_command_capacity: usize,
    /// Value of the `X-Rate-Limit` login header.
    pub rate_limit: u32,
    /// Records replayed on join.
    pub replay_len: usize,
    /// How long the hub waits for participants to leave on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            public_url: None,
            max_message_size: 512,
            queue_capacity: 256,
            hub_command_capacity: 1024,
            rate_limit: 100,
            replay_len: 10,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            public_url: settings.server.public_url.clone(),
            max_message_size: settings.server.max_message_size,
            queue_capacity: settings.server.queue_capacity,
            hub_command_capacity: settings.server.hub_command_capacity,
            rate_limit: settings.server.rate_limit,
            replay_len: settings.history.replay_len,
            shutdown_grace: Duration::from_secs(settings.server.shutdown_grace_secs),
        }
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-connection reader/writer timings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PumpConfig {
    /// Read deadline, renewed on pong.
    pub pong_wait: Duration,
    /// Ping interval.
    pub ping_period: Duration,
    /// Deadline for flushing a batch.
    pub write_wait: Duration,
    /// Deadline for sending a ping.
    pub ping_write_wait: Duration,
    /// Most frames per flush.
    pub max_batch: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(50),
            write_wait: Duration::from_secs(10),
            ping_write_wait: Duration::from_secs(3),
            max_batch: 64,
        }
    }
}

impl PumpConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        let p = &settings.pumps;
        Self {
            pong_wait: Duration::from_secs(p.pong_wait_secs),
            ping_period: Duration::from_secs(p.ping_period_secs),
            write_wait: Duration::from_secs(p.write_wait_secs),
            ping_write_wait: Duration::from_secs(p.ping_write_wait_secs),
            max_batch: p.max_batch.max(1),
        }
    }
}
