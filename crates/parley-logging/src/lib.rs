//! # parley-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the global subscriber from [`LoggingSettings`]:
//!   an `EnvFilter` (`RUST_LOG` wins over the configured level) and a compact or
//!   JSON `fmt` layer writing to stderr or to a log file.
//! - [`capture_logs`] installs a thread-local in-memory layer for tests.

#![deny(unsafe_code)]

pub mod test_utils;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use parley_settings::{LogFormat, LoggingSettings};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Errors from subscriber setup.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log file could not be opened for appending.
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        /// File that was being opened.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup. Later calls leave the first subscriber in place.
pub fn init_subscriber(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let (writer, ansi) = match &settings.file {
        Some(path) => {
            let path = PathBuf::from(path);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| LoggingError::OpenFile { path, source })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    let fmt_layer = match settings.format {
        LogFormat::Compact => fmt_layer.compact().boxed(),
        LogFormat::Json => fmt_layer.json().boxed(),
    };

    // try_init is a no-op if a global subscriber is already set
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
