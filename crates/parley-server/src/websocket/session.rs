//! Connection lifecycle, from admission through disconnect.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream};
use metrics::{counter, gauge, histogram};
use parley_history::HistoryStore;
use parley_sessions::{Admission, SessionRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::frame::{Frame, encode};
use super::participant::{MembershipState, Participant, ParticipantId};
use super::pump::{ReaderContext, ReaderExit, WriterExit, read_pump, write_pump};
use crate::config::PumpConfig;
use crate::hub::HubHandle;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Everything a connection needs from the server.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Broadcast hub.
    pub hub: HubHandle,
    /// Message history.
    pub history: Arc<dyn HistoryStore>,
    /// Released when the connection ends.
    pub sessions: Arc<SessionRegistry>,
    /// Pump timings.
    pub pumps: PumpConfig,
    /// Outbound queue depth.
    pub queue_capacity: usize,
    /// Records replayed on join.
    pub replay_len: usize,
    /// Server-wide cancellation.
    pub shutdown: CancellationToken,
}

/// How a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Hub membership key used for this connection.
    pub participant: ParticipantId,
    /// Membership state at exit: `Pending` if the hub refused the
    /// participant, otherwise `Closed`.
    pub state: MembershipState,
    /// Reader outcome, if the pumps ran.
    pub reader: Option<ReaderExit>,
    /// Writer outcome, if the pumps ran.
    pub writer: Option<WriterExit>,
}

/// Run an admitted connection to completion.
///
/// 1. Register with the hub (refused during shutdown)
/// 2. Snapshot the history tail and hand it to the writer ahead of live frames
/// 3. Spawn the writer, run the reader inline
/// 4. On reader exit: unregister, cancel the writer, release the login
///
/// Registering before the snapshot means nothing broadcast after admission is
/// missed; a message landing between the two may arrive twice.
#[instrument(skip_all, fields(user = %admission.name))]
pub async fn run_connection<K, S, E>(
    mut sink: K,
    stream: S,
    admission: Admission,
    ctx: ConnectionContext,
) -> ConnectionSummary
where
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: Display,
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let started = std::time::Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (participant, rx) = Participant::new(admission.name.clone(), ctx.queue_capacity);
    let id = participant.id;
    let mut state = MembershipState::Pending;

    let (reader, writer) = if let Err(e) = ctx.hub.register(participant).await {
        warn!(error = %e, "hub refused participant");
        let _ = tokio::time::timeout(ctx.pumps.write_wait, sink.send(Message::Close(None))).await;
        (None, None)
    } else {
        state = MembershipState::Active;
        info!(participant = %id, ?state, "participant joined");

        let replay = replay_frames(ctx.history.as_ref(), ctx.replay_len);
        let cancel = ctx.shutdown.child_token();

        let writer_cancel = cancel.clone();
        let writer_config = ctx.pumps.clone();
        let writer = tokio::spawn(async move {
            let exit = write_pump(sink, rx, replay, &writer_config, &writer_cancel).await;
            // a dead writer takes the reader down with it
            writer_cancel.cancel();
            exit
        });

        let reader_ctx = ReaderContext {
            name: admission.name.clone(),
            hub: ctx.hub.clone(),
            history: ctx.history.clone(),
        };
        let reader_exit = read_pump(stream, &reader_ctx, &ctx.pumps, &cancel).await;
        debug!(?reader_exit, "reader finished");

        ctx.hub.unregister(id).await;
        cancel.cancel();
        let writer_exit = match writer.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(error = %e, "writer task failed");
                None
            }
        };
        state = MembershipState::Closed;
        (Some(reader_exit), writer_exit)
    };

    ctx.sessions.release(admission.user_id);

    info!(participant = %id, ?reader, ?writer, "participant left");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    ConnectionSummary {
        participant: id,
        state,
        reader,
        writer,
    }
}

/// Encode the last `n` records, oldest first. Storage errors yield no replay.
fn replay_frames(history: &dyn HistoryStore, n: usize) -> Vec<Frame> {
    if n == 0 {
        return Vec::new();
    }
    match history.tail(n) {
        Ok(records) => records.iter().filter_map(|r| encode(r).ok()).collect(),
        Err(e) => {
            warn!(error = %e, "history unavailable, skipping replay");
            Vec::new()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::channel::mpsc as fmpsc;
    use parley_history::{HistoryRecord, MemoryHistory};
    use parley_settings::AuthSettings;
    use tokio::sync::mpsc;

    use super::*;
    use crate::hub::{HubConfig, HubState, spawn_hub};

    type Inbound = Result<Message, std::io::Error>;

    struct Fixture {
        ctx: ConnectionContext,
        history: Arc<MemoryHistory>,
        admission: Admission,
        shutdown: CancellationToken,
    }

    fn fixture() -> Fixture {
        let shutdown = CancellationToken::new();
        let (hub, _task) = spawn_hub(&HubConfig::default(), shutdown.clone());
        let history = Arc::new(MemoryHistory::new(100));
        let sessions = Arc::new(SessionRegistry::new(&AuthSettings::default()));
        let _ = sessions.create_user("alice", "password1").unwrap();
        let grant = sessions.login("alice", "password1").unwrap();
        let admission = sessions.consume_token(&grant.token).unwrap();
        Fixture {
            ctx: ConnectionContext {
                hub,
                history: history.clone(),
                sessions,
                pumps: PumpConfig::default(),
                queue_capacity: 8,
                replay_len: 2,
                shutdown: shutdown.clone(),
            },
            history,
            admission,
            shutdown,
        }
    }

    fn texts(sent: &[Message]) -> Vec<String> {
        sent.iter()
            .filter_map(|m| match m {
                Message::Text(t) => {
                    let v: serde_json::Value = serde_json::from_str(t.as_str()).ok()?;
                    v["message"].as_str().map(str::to_owned)
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn replays_tail_then_echoes_own_message() {
        let fx = fixture();
        for m in ["old1", "old2", "old3"] {
            fx.history.append(HistoryRecord::new("bobby", m)).unwrap();
        }
        let (sink, out) = fmpsc::unbounded::<Message>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Inbound>();

        let ctx = fx.ctx.clone();
        let conn = tokio::spawn(run_connection(sink, in_rx, fx.admission.clone(), ctx));

        in_tx.unbounded_send(Ok(Message::Text("hi all".into()))).unwrap();
        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let summary = conn.await.unwrap();
        assert_eq!(summary.state, MembershipState::Closed);
        assert_eq!(summary.reader, Some(ReaderExit::Closed));

        let sent: Vec<Message> = out.collect().await;
        let got = texts(&sent);
        // replay window is 2; the own message may or may not beat the close
        assert_eq!(&got[..2], ["old2", "old3"]);
        assert!(got.len() <= 3);
    }

    #[tokio::test]
    async fn disconnect_unregisters_and_releases_login() {
        let fx = fixture();
        let (sink, _out) = fmpsc::unbounded::<Message>();
        let inbound = futures::stream::iter(vec![Ok::<Message, std::io::Error>(Message::Close(None))]);

        let summary = run_connection(sink, inbound, fx.admission.clone(), fx.ctx.clone()).await;
        assert_eq!(summary.reader, Some(ReaderExit::Closed));
        assert!(summary.writer.is_some());
        assert!(fx.ctx.hub.active_users().await.unwrap().is_empty());
        assert!(!fx.ctx.sessions.is_logged_in("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_closes_the_connection() {
        let fx = fixture();
        let ctx = ConnectionContext {
            queue_capacity: 1,
            ..fx.ctx.clone()
        };
        // a sink nobody drains, so the writer stalls on its first frame
        let (sink, _out) = futures::channel::mpsc::channel::<Message>(0);
        let (_in_tx, in_rx) = fmpsc::unbounded::<Inbound>();
        let conn = tokio::spawn(run_connection(sink, in_rx, fx.admission.clone(), ctx));

        // wait for admission
        while fx.ctx.hub.active_users().await.unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        for _ in 0..8 {
            fx.ctx.hub.broadcast(Frame::from_static("flood")).await.unwrap();
        }

        let summary = tokio::time::timeout(std::time::Duration::from_secs(30), conn)
            .await
            .expect("connection should end after eviction")
            .unwrap();
        assert_eq!(summary.reader, Some(ReaderExit::Cancelled));
        assert!(fx.ctx.hub.active_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refused_during_shutdown() {
        let fx = fixture();
        // keep the hub alive in ShuttingDown with one lingering member
        let (lingerer, _rx) = Participant::new("lingerer", 4);
        fx.ctx.hub.register(lingerer).await.unwrap();
        fx.shutdown.cancel();
        while fx.ctx.hub.state() == HubState::Running {
            tokio::task::yield_now().await;
        }

        let (sink, out) = fmpsc::unbounded::<Message>();
        let inbound = futures::stream::pending::<Inbound>();
        let summary = run_connection(sink, inbound, fx.admission.clone(), fx.ctx.clone()).await;

        assert_eq!(summary.state, MembershipState::Pending);
        assert_eq!(summary.reader, None);
        let sent: Vec<Message> = out.collect().await;
        assert!(matches!(sent.as_slice(), [Message::Close(None)]));
        assert!(!fx.ctx.sessions.is_logged_in("alice"));
    }

    #[test]
    fn replay_skips_when_disabled_or_unavailable() {
        let history = MemoryHistory::new(10);
        history.append(HistoryRecord::new("x", "y")).unwrap();
        assert!(replay_frames(&history, 0).is_empty());
        assert_eq!(replay_frames(&history, 5).len(), 1);
        history.close();
        assert!(replay_frames(&history, 5).is_empty());
    }

    #[tokio::test]
    async fn context_clones_share_hub() {
        let fx = fixture();
        let (p, _rx): (Participant, mpsc::Receiver<Frame>) = Participant::new("zed", 1);
        fx.ctx.clone().hub.register(p).await.unwrap();
        assert_eq!(fx.ctx.hub.active_users().await.unwrap(), ["zed"]);
    }
}
