//! # parley
//!
//! Chat server binary: wires settings, logging, history, and sessions into
//! the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_server::{ParleyServer, PumpConfig, ServerConfig};
use parley_sessions::SessionRegistry;
use parley_settings::loader::parse_variant;
use parley_settings::{HistoryBackend, ParleySettings};

/// parley chat server.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time chat fan-out server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.parley/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// History backend: `memory` or `sqlite`.
    #[arg(long, value_parser = parse_backend)]
    history: Option<HistoryBackend>,

    /// `SQLite` history file. Implies `--history sqlite`.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter, e.g. `info` or `parley_server=debug`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(backend) = self.history {
            settings.history.backend = backend;
        }
        if let Some(path) = &self.db_path {
            settings.history.backend = HistoryBackend::Sqlite;
            settings.history.sqlite_path = Some(path.display().to_string());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn parse_backend(val: &str) -> std::result::Result<HistoryBackend, String> {
    parse_variant(val).ok_or_else(|| format!("unknown history backend: {val}"))
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(parley_settings::settings_path);
    let mut settings = parley_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    parley_logging::init_subscriber(&settings.logging).context("Failed to initialize logging")?;
    tracing::info!(path = %settings_path.display(), "settings loaded");

    let metrics = match parley_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    if let Some(path) = &settings.history.sqlite_path {
        ensure_parent_dir(std::path::Path::new(path))?;
    }
    let history = parley_history::open_history(&settings.history).context("Failed to open history")?;
    let sessions = Arc::new(SessionRegistry::new(&settings.auth));

    let mut server = ParleyServer::new(
        ServerConfig::from_settings(&settings),
        PumpConfig::from_settings(&settings),
        sessions,
        history,
    );
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("parley listening on http://{addr}");

    shutdown_signal().await?;

    server.shutdown().await;
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
