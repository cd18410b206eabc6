//! WebSocket connection handling.
//!
//! - [`frame`]: text normalization and record encoding
//! - [`participant`]: hub membership and the outbound queue
//! - [`pump`]: reader and writer loops
//! - [`session`]: one connection from admission to release

pub mod frame;
pub mod participant;
pub mod pump;
pub mod session;

pub use frame::Frame;
pub use participant::{MembershipState, Participant, ParticipantId};
pub use pump::{ReaderExit, WriterExit};
pub use session::{ConnectionContext, ConnectionSummary, run_connection};
