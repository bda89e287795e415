//! Flow domain types: peer announcements and the sync envelope.
//!
//! Everything here is pure data plus replay bookkeeping; the sockets and
//! focus semantics live in the daemon.

pub mod announce;
pub mod envelope;

pub use announce::PeerAnnounce;
pub use envelope::{PeerId, ReplayFilter, SyncEnvelope, SyncKind};
