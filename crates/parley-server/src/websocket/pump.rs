//! Per-connection reader and writer pumps.
//!
//! Both are generic over the transport halves so they can run against an
//! axum `WebSocket` split or against in-memory channels in tests.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use parley_history::{HistoryRecord, HistoryStore};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frame::{Frame, encode, sanitize};
use crate::config::PumpConfig;
use crate::hub::HubHandle;
use crate::metrics::HISTORY_APPEND_FAILURES_TOTAL;

/// Why the reader stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    /// Peer sent a close frame.
    Closed,
    /// Transport stream ended without a close frame.
    StreamEnded,
    /// Nothing (not even a pong) arrived before the read deadline.
    TimedOut,
    /// Transport read error, including oversized messages.
    TransportError,
    /// Connection or server cancellation.
    Cancelled,
    /// The hub is gone.
    HubStopped,
}

/// Why the writer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterExit {
    /// The hub closed the queue (eviction, unregister, or hub stop).
    QueueClosed,
    /// Connection or server cancellation.
    Cancelled,
    /// A write returned an error.
    WriteFailed,
    /// A write missed its deadline.
    WriteTimedOut,
}

/// What the reader needs besides the transport.
pub struct ReaderContext {
    /// Sender's display name, stamped on every record.
    pub name: String,
    /// Fan-out target.
    pub hub: HubHandle,
    /// Where records are appended.
    pub history: Arc<dyn HistoryStore>,
}

/// Read inbound frames until the peer leaves, errs, goes silent, or the
/// connection is cancelled.
///
/// The read deadline is renewed on every pong. Valid text (and UTF-8 binary)
/// is sanitized, stored, and broadcast; a storage failure is logged and the
/// broadcast still happens.
pub async fn read_pump<S, E>(
    mut stream: S,
    ctx: &ReaderContext,
    config: &PumpConfig,
    cancel: &CancellationToken,
) -> ReaderExit
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReaderExit::Cancelled,
            next = timeout_at(deadline, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                debug!(name = %ctx.name, "read deadline elapsed");
                return ReaderExit::TimedOut;
            }
            Ok(None) => return ReaderExit::StreamEnded,
            Ok(Some(Err(e))) => {
                debug!(name = %ctx.name, error = %e, "read failed");
                return ReaderExit::TransportError;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let text = match msg {
            Message::Text(t) => sanitize(t.as_str()),
            Message::Binary(data) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    sanitize(s)
                } else {
                    debug!(name = %ctx.name, len = data.len(), "dropping non-UTF8 binary frame");
                    continue;
                }
            }
            Message::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => return ReaderExit::Closed,
        };

        if text.is_empty() {
            continue;
        }

        let record = HistoryRecord::new(ctx.name.as_str(), text);
        let frame = match encode(&record) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode message");
                continue;
            }
        };
        if let Err(e) = ctx.history.append(record) {
            warn!(name = %ctx.name, error = %e, "history append failed");
            counter!(HISTORY_APPEND_FAILURES_TOTAL).increment(1);
        }
        if ctx.hub.broadcast(frame).await.is_err() {
            return ReaderExit::HubStopped;
        }
    }
}

/// Deliver queued frames and heartbeats until the queue closes, a write
/// fails, or the connection is cancelled.
///
/// `replay` is flushed before the live queue is read. Ready frames are
/// coalesced (up to `max_batch`) into a single flush.
pub async fn write_pump<K>(
    mut sink: K,
    mut rx: mpsc::Receiver<Frame>,
    replay: Vec<Frame>,
    config: &PumpConfig,
    cancel: &CancellationToken,
) -> WriterExit
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    if !replay.is_empty() {
        if let Err(exit) = write_batch(&mut sink, replay, config).await {
            return exit;
        }
    }

    let mut ping = tokio::time::interval(config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                send_close(&mut sink, config).await;
                return WriterExit::Cancelled;
            }

            frame = rx.recv() => {
                let Some(frame) = frame else {
                    send_close(&mut sink, config).await;
                    return WriterExit::QueueClosed;
                };
                let mut batch = vec![frame];
                while batch.len() < config.max_batch {
                    match rx.try_recv() {
                        Ok(frame) => batch.push(frame),
                        Err(_) => break,
                    }
                }
                if let Err(exit) = write_batch(&mut sink, batch, config).await {
                    return exit;
                }
            }

            _ = ping.tick() => {
                match timeout(config.ping_write_wait, sink.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "ping failed");
                        return WriterExit::WriteFailed;
                    }
                    Err(_) => return WriterExit::WriteTimedOut,
                }
            }
        }
    }
}

async fn write_batch<K>(sink: &mut K, batch: Vec<Frame>, config: &PumpConfig) -> Result<(), WriterExit>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let write = async {
        for frame in batch {
            sink.feed(Message::Text(frame)).await?;
        }
        sink.flush().await
    };
    match timeout(config.write_wait, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "write failed");
            Err(WriterExit::WriteFailed)
        }
        Err(_) => Err(WriterExit::WriteTimedOut),
    }
}

async fn send_close<K>(sink: &mut K, config: &PumpConfig)
where
    K: Sink<Message> + Unpin,
{
    let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
