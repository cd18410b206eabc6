//! # parley-server
//!
//! Axum HTTP + WebSocket chat server.
//!
//! - [`hub`]: single-owner broadcast actor; evicts participants whose queue is full
//! - [`websocket`]: per-connection reader/writer pumps and lifecycle
//! - [`http`]: account, login, roster, and upgrade handlers
//! - [`server`]: router assembly, listener, graceful shutdown
//! - [`metrics`]: Prometheus recorder and metric names

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{PumpConfig, ServerConfig};
pub use error::ApiError;
pub use hub::{HubConfig, HubError, HubHandle, HubState};
pub use server::{AppState, ParleyServer};
pub use shutdown::ShutdownCoordinator;
