//! Broadcast hub: the single owner of chat membership.
//!
//! One task consumes a command channel. Registration, removal, and fan-out
//! are all steps of that one loop, so every participant observes broadcasts
//! in the same order and membership never changes mid-delivery.
//!
//! Fan-out never waits on a consumer. A participant whose queue is full (or
//! whose writer has already gone) is removed in the same step, which drops
//! the only sender for its queue and lets its writer pump shut down.
//!
//! Lifecycle: `Running` → (cancel) → `ShuttingDown` → `Stopped`. While
//! shutting down, registrations are refused and unregistrations drained until
//! membership is empty or the grace period runs out.

use std::collections::HashMap;
use std::time::Duration;

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{HUB_BROADCASTS_TOTAL, HUB_EVICTIONS_TOTAL, HUB_PARTICIPANTS};
use crate::websocket::frame::Frame;
use crate::websocket::participant::{Participant, ParticipantId};

/// Observable hub lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubState {
    /// Accepting registrations.
    Running,
    /// Refusing registrations, draining members.
    ShuttingDown,
    /// Control loop has exited.
    Stopped,
}

impl HubState {
    /// Lowercase label for health output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

/// Hub command failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The control loop is gone.
    #[error("hub stopped")]
    Stopped,
    /// Registration refused because shutdown has begun.
    #[error("hub is shutting down")]
    Closed,
}

enum HubCommand {
    Register {
        participant: Participant,
        ack: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister(ParticipantId),
    Broadcast(Frame),
    ActiveUsers(oneshot::Sender<Vec<String>>),
}

/// Hub tuning.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Command channel depth.
    pub command_capacity: usize,
    /// How long to wait for members to leave after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Cloneable sender side of the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    state: watch::Receiver<HubState>,
}

impl HubHandle {
    /// Add a participant. Resolves once the hub has admitted or refused it.
    pub async fn register(&self, participant: Participant) -> Result<(), HubError> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Register { participant, ack })
            .await
            .map_err(|_| HubError::Stopped)?;
        ack_rx.await.map_err(|_| HubError::Stopped)?
    }

    /// Remove a participant. Unknown ids and a stopped hub are ignored.
    pub async fn unregister(&self, id: ParticipantId) {
        let _ = self.tx.send(HubCommand::Unregister(id)).await;
    }

    /// Submit a frame for fan-out to every member.
    pub async fn broadcast(&self, frame: Frame) -> Result<(), HubError> {
        self.tx
            .send(HubCommand::Broadcast(frame))
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Sorted display names of current members.
    pub async fn active_users(&self) -> Result<Vec<String>, HubError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::ActiveUsers(reply))
            .await
            .map_err(|_| HubError::Stopped)?;
        reply_rx.await.map_err(|_| HubError::Stopped)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    /// Wait until the control loop has exited.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == HubState::Stopped).await;
    }
}

/// The control loop's state. Construct with [`Hub::new`], drive with
/// [`Hub::run`].
pub struct Hub {
    rx: mpsc::Receiver<HubCommand>,
    members: HashMap<ParticipantId, Participant>,
    state: watch::Sender<HubState>,
    grace: Duration,
}

impl Hub {
    /// Create a hub and its handle.
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(HubState::Running);
        (
            Self {
                rx,
                members: HashMap::new(),
                state: state_tx,
                grace: config.shutdown_grace,
            },
            HubHandle {
                tx,
                state: state_rx,
            },
        )
    }

    /// Run until cancelled and drained, or until every handle is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled(), if deadline.is_none() => {
                    let _ = self.state.send_replace(HubState::ShuttingDown);
                    deadline = Some(Instant::now() + self.grace);
                    info!(members = self.members.len(), "hub shutting down");
                    if self.members.is_empty() {
                        break;
                    }
                }

                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(remaining = self.members.len(), "hub grace period elapsed");
                    break;
                }

                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle(cmd);
                    if deadline.is_some() && self.members.is_empty() {
                        break;
                    }
                }
            }
        }

        // Dropping the remaining senders closes every queue.
        self.members.clear();
        record_membership(0);
        let _ = self.state.send_replace(HubState::Stopped);
        info!("hub stopped");
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { participant, ack } => {
                if *self.state.borrow() != HubState::Running {
                    debug!(name = %participant.name, "registration refused during shutdown");
                    let _ = ack.send(Err(HubError::Closed));
                    return;
                }
                debug!(id = %participant.id, name = %participant.name, "participant registered");
                let _ = self.members.insert(participant.id, participant);
                record_membership(self.members.len());
                let _ = ack.send(Ok(()));
            }
            HubCommand::Unregister(id) => {
                if let Some(p) = self.members.remove(&id) {
                    debug!(%id, name = %p.name, "participant unregistered");
                    record_membership(self.members.len());
                }
            }
            HubCommand::Broadcast(frame) => self.broadcast(&frame),
            HubCommand::ActiveUsers(reply) => {
                let mut names: Vec<String> =
                    self.members.values().map(|p| p.name.clone()).collect();
                names.sort();
                let _ = reply.send(names);
            }
        }
    }

    fn broadcast(&mut self, frame: &Frame) {
        counter!(HUB_BROADCASTS_TOTAL).increment(1);

        let mut evicted = Vec::new();
        for (id, participant) in &self.members {
            match participant.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%id, name = %participant.name, "queue full, evicting slow participant");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%id, name = %participant.name, "queue closed, evicting participant");
                    evicted.push(*id);
                }
            }
        }

        if !evicted.is_empty() {
            for id in &evicted {
                let _ = self.members.remove(id);
            }
            counter!(HUB_EVICTIONS_TOTAL).increment(evicted.len() as u64);
            record_membership(self.members.len());
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_membership(count: usize) {
    gauge!(HUB_PARTICIPANTS).set(count as f64);
}

/// Spawn a hub on the current runtime.
pub fn spawn_hub(config: &HubConfig, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
    let (hub, handle) = Hub::new(config);
    let task = tokio::spawn(hub.run(shutdown));
    (handle, task)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    fn start() -> (HubHandle, JoinHandle<()>, CancellationToken) {
        let token = CancellationToken::new();
        let (handle, task) = spawn_hub(&HubConfig::default(), token.clone());
        (handle, task, token)
    }

    fn frame(text: &'static str) -> Frame {
        Frame::from_static(text)
    }

    async fn join(hub: &HubHandle, name: &str, capacity: usize) -> (ParticipantId, mpsc::Receiver<Frame>) {
        let (p, rx) = Participant::new(name, capacity);
        let id = p.id;
        hub.register(p).await.unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_in_order() {
        let (hub, _task, _token) = start();
        let (_, mut a) = join(&hub, "alice", 8).await;
        let (_, mut b) = join(&hub, "bobby", 8).await;

        hub.broadcast(frame("one")).await.unwrap();
        hub.broadcast(frame("two")).await.unwrap();
        // ordered after the broadcasts
        let _ = hub.active_users().await.unwrap();

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.try_recv().unwrap().as_str(), "one");
            assert_eq!(rx.try_recv().unwrap().as_str(), "two");
            assert_matches!(rx.try_recv(), Err(TryRecvError::Empty));
        }
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_slow_member() {
        let (hub, _task, _token) = start();
        let (_, mut slow) = join(&hub, "slowpoke", 1).await;
        let (_, mut f1) = join(&hub, "fast1", 8).await;
        let (_, mut f2) = join(&hub, "fast2", 8).await;

        hub.broadcast(frame("first")).await.unwrap();
        hub.broadcast(frame("second")).await.unwrap();

        assert_eq!(hub.active_users().await.unwrap(), ["fast1", "fast2"]);

        // the slow member keeps what it had, then sees its queue closed
        assert_eq!(slow.recv().await.unwrap().as_str(), "first");
        assert!(slow.recv().await.is_none());

        for rx in [&mut f1, &mut f2] {
            assert_eq!(rx.recv().await.unwrap().as_str(), "first");
            assert_eq!(rx.recv().await.unwrap().as_str(), "second");
        }
    }

    #[tokio::test]
    async fn closed_receiver_is_evicted_on_next_broadcast() {
        let (hub, _task, _token) = start();
        let (_, gone) = join(&hub, "ghost", 8).await;
        let (_, _alive) = join(&hub, "alive", 8).await;
        drop(gone);

        hub.broadcast(frame("x")).await.unwrap();
        assert_eq!(hub.active_users().await.unwrap(), ["alive"]);
    }

    #[tokio::test]
    async fn unregister_twice_is_noop() {
        let (hub, _task, _token) = start();
        let (id, mut rx) = join(&hub, "alice", 8).await;

        hub.unregister(id).await;
        hub.unregister(id).await;

        assert!(hub.active_users().await.unwrap().is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn active_users_sorted() {
        let (hub, _task, _token) = start();
        let _c = join(&hub, "carol", 4).await;
        let _a = join(&hub, "alice", 4).await;
        let _b = join(&hub, "bobby", 4).await;
        assert_eq!(hub.active_users().await.unwrap(), ["alice", "bobby", "carol"]);
    }

    #[tokio::test]
    async fn empty_hub_stops_immediately_on_cancel() {
        let (hub, task, token) = start();
        assert_eq!(hub.state(), HubState::Running);
        token.cancel();
        task.await.unwrap();
        assert_eq!(hub.state(), HubState::Stopped);
        assert_matches!(hub.broadcast(frame("late")).await, Err(HubError::Stopped));
        assert_matches!(hub.active_users().await, Err(HubError::Stopped));
    }

    #[tokio::test]
    async fn shutdown_refuses_registration_and_drains() {
        let (hub, task, token) = start();
        let (id, mut rx) = join(&hub, "alice", 4).await;

        token.cancel();
        // wait for the loop to observe cancellation
        let mut state = hub.state.clone();
        let _ = state.wait_for(|s| *s == HubState::ShuttingDown).await;

        let (late, _late_rx) = Participant::new("latecomer", 4);
        assert_eq!(hub.register(late).await, Err(HubError::Closed));

        // still delivering to existing members while draining
        hub.broadcast(frame("bye")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().as_str(), "bye");

        hub.unregister(id).await;
        task.await.unwrap();
        assert_eq!(hub.state(), HubState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_bounds_shutdown() {
        let token = CancellationToken::new();
        let config = HubConfig {
            shutdown_grace: Duration::from_secs(5),
            ..HubConfig::default()
        };
        let (hub, task) = spawn_hub(&config, token.clone());
        let (_id, mut rx) = join(&hub, "lingerer", 4).await;

        let started = Instant::now();
        token.cancel();
        hub.stopped().await;
        task.await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        // queue closed when the hub dropped its members
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_all_handles_stops_hub() {
        let (hub, task, _token) = start();
        drop(hub);
        task.await.unwrap();
    }

    #[test]
    fn state_labels() {
        assert_eq!(HubState::Running.as_str(), "running");
        assert_eq!(HubState::ShuttingDown.as_str(), "shutting_down");
        assert_eq!(HubState::Stopped.as_str(), "stopped");
    }
}
