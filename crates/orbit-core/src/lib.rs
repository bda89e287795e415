//! # orbit-core
//!
//! Shared library for Orbit containing the device wire codec, the gesture
//! classification state machine, and the Flow synchronization envelope types.
//!
//! This crate is used by the daemon and by any tooling that needs to speak the
//! device protocol.  It has zero dependencies on OS APIs, sockets, or timers:
//! everything here is pure data transformation so it can be tested without a
//! physical mouse or a network.
//!
//! The three top-level modules:
//!
//! - **`protocol`** – the fixed-size binary report format the pointing device
//!   speaks (7-byte short and 20-byte long reports), the per-session feature
//!   table, and the request-tag allocator used to correlate responses.
//!
//! - **`gesture`** – classifies raw gesture-button press/release events into
//!   radial-menu intents (tap = select, hold = open).  The machine is driven
//!   externally; it owns no timer of its own.
//!
//! - **`flow`** – the envelope exchanged between paired Orbit instances on the
//!   LAN (clipboard payloads and focus handoffs) plus the per-peer replay
//!   filter that makes delivery idempotent.

pub mod flow;
pub mod gesture;
pub mod protocol;

pub use flow::announce::PeerAnnounce;
pub use flow::envelope::{PeerId, ReplayFilter, SyncEnvelope, SyncKind};
pub use gesture::{GestureStateMachine, MenuIntent, PointerPosition};
pub use protocol::frame::{Frame, InboundFrame, MalformedFrame, ReportKind};
pub use protocol::table::FeatureTable;
