//! # orbit-daemon
//!
//! The Orbit background daemon.  Owns the device session (wire protocol,
//! feature discovery, notifications), recognizes the menu gesture, switches
//! host slots, and runs Flow: LAN peer discovery, pairing, and
//! clipboard/focus synchronization.  UI surfaces subscribe through the event
//! bus in [`events`] and send commands over the socket in [`control`].

pub mod config;
pub mod control;
pub mod device;
pub mod events;
pub mod flow;
pub mod gesture_driver;
