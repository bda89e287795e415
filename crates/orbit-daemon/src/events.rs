//! Daemon ↔ presentation-layer contract.
//!
//! The UI process (menu renderer, settings dashboard) subscribes to a
//! broadcast stream of [`DaemonEvent`]s and sends [`UiCommand`]s back.  The
//! bus is a `tokio::sync::broadcast` channel so any number of UI surfaces can
//! attach and detach without the daemon caring.

use serde::{Deserialize, Serialize};

use orbit_core::flow::envelope::PeerId;
use orbit_core::gesture::MenuIntent;

/// Capacity of the broadcast channel.  A slow subscriber that falls more than
/// this far behind starts losing the oldest events (broadcast semantics);
/// every event type here is a snapshot or a one-shot intent, so that is
/// acceptable.
const EVENT_BUS_CAPACITY: usize = 256;

/// Battery state as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    pub percent: u8,
    pub charging: bool,
}

/// One Easy-Switch host slot as the device reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSlot {
    /// Zero-based slot index, stable across queries.
    pub index: u8,
    pub name: String,
    /// Whether the device currently points at this slot.
    pub is_current: bool,
}

/// Whether the daemon currently has a working device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Connected,
    Unavailable,
}

/// Flow happenings the UI may want to surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    PeerDiscovered { peer_id: PeerId, name: String },
    PeerLost { peer_id: PeerId },
    PeerPaired { peer_id: PeerId },
    /// Focus moved; `None` means this instance owns it again.
    FocusChanged { owner: Option<PeerId> },
    /// Clipboard content arrived from the focus owner; the UI surface
    /// applies it to the system clipboard.
    ClipboardReceived { payload: Vec<u8> },
}

/// Everything the daemon publishes to its UI surfaces.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    Battery(BatterySnapshot),
    HostList(Vec<HostSlot>),
    Dpi(u16),
    Menu(MenuIntent),
    Device(DeviceState),
    Flow(FlowEvent),
}

/// Commands a UI surface sends back to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    /// Switch the device to the given host slot.
    SwitchTo { index: u8 },
    /// The user picked a menu action; feeds the gesture highlight.
    Select { action_id: u32 },
}

/// Shared broadcast bus for [`DaemonEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes an event to all current subscribers.  Events published with
    /// no subscriber attached are dropped silently.
    pub fn publish(&self, event: DaemonEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DaemonEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
