//! Hub membership handle and outbound queue.

use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::frame::Frame;

/// Opaque handle the hub keys membership by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Generate a new unique id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a connection stands with respect to the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipState {
    /// Registration sent and not acknowledged, or refused.
    Pending,
    /// Admitted; receiving broadcasts.
    Active,
    /// Evicted or unregistered.
    Closed,
}

/// A member as the hub holds it.
///
/// `tx` is the only sender for the participant's queue. When the hub drops
/// the participant the queue closes and the writer pump winds down.
#[derive(Debug)]
pub struct Participant {
    /// Membership key.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Outbound queue.
    pub tx: mpsc::Sender<Frame>,
}

impl Participant {
    /// Create a participant and the receiving end of its queue.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ParticipantId::new(),
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}
