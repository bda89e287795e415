//! Focus ownership and clipboard routing between paired instances.
//!
//! Exactly one instance in a Flow group owns input focus at a time; the
//! owner is the clipboard source and everyone else is a sink.  Ownership
//! moves by explicit handoff envelopes (typically triggered by the device
//! switching host slots), never implicitly.  Delivery is idempotent: each
//! envelope carries a per-origin sequence and replays are dropped.

use thiserror::Error;
use tracing::{debug, info};

use orbit_core::flow::envelope::{PeerId, ReplayFilter, SyncEnvelope, SyncKind};

use crate::events::{DaemonEvent, EventBus, FlowEvent};

/// Who currently owns input focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOwner {
    /// This instance; clipboard forwarding is armed.
    Local,
    /// A peer; incoming clipboard content is applied here.
    Peer(PeerId),
}

/// What the daemon should do with an accepted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAction {
    /// Write these bytes to the local clipboard.
    ApplyClipboard(Vec<u8>),
    /// This instance just became the focus owner.
    FocusGained { from: PeerId },
}

/// Raised when an operation needs focus ownership this instance lacks.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("not the focus owner")]
pub struct NotFocusOwner;

/// Per-instance Flow state machine.
pub struct FlowOrchestrator {
    local_peer: PeerId,
    focus: FocusOwner,
    replay: ReplayFilter,
    /// Sequence stamped on the next outbound envelope.
    next_sequence: u64,
    bus: EventBus,
}

impl FlowOrchestrator {
    /// A fresh instance starts owning its own focus.
    pub fn new(local_peer: PeerId, bus: EventBus) -> Self {
        Self {
            local_peer,
            focus: FocusOwner::Local,
            replay: ReplayFilter::new(),
            next_sequence: 1,
            bus,
        }
    }

    pub fn focus_owner(&self) -> FocusOwner {
        self.focus
    }

    pub fn owns_focus(&self) -> bool {
        self.focus == FocusOwner::Local
    }

    /// Processes an envelope that already passed the transport boundary.
    ///
    /// Returns `None` when the envelope is a no-op: a replayed sequence, or
    /// clipboard content while this instance owns focus (the feedback-loop
    /// guard — the owner is the source, never a sink).
    pub fn handle_envelope(&mut self, envelope: SyncEnvelope) -> Option<FlowAction> {
        if !self.replay.accept(envelope.origin, envelope.sequence) {
            debug!(
                origin = %envelope.origin,
                sequence = envelope.sequence,
                "replayed envelope dropped"
            );
            return None;
        }

        match envelope.kind {
            SyncKind::FocusHandoff => match envelope.target {
                Some(target) if target != self.local_peer => {
                    // Focus moved between two other peers; track the new
                    // owner without claiming anything ourselves.
                    info!(from = %envelope.origin, to = %target, "focus moved to another peer");
                    self.focus = FocusOwner::Peer(target);
                    self.bus
                        .publish(DaemonEvent::Flow(FlowEvent::FocusChanged { owner: Some(target) }));
                    None
                }
                _ => {
                    info!(from = %envelope.origin, "focus handed to this instance");
                    self.focus = FocusOwner::Local;
                    self.bus
                        .publish(DaemonEvent::Flow(FlowEvent::FocusChanged { owner: None }));
                    Some(FlowAction::FocusGained { from: envelope.origin })
                }
            },
            SyncKind::Clipboard => {
                if self.owns_focus() {
                    debug!(origin = %envelope.origin, "clipboard ignored while owning focus");
                    return None;
                }
                Some(FlowAction::ApplyClipboard(envelope.payload))
            }
        }
    }

    /// Gives up focus to `peer` (the local device switched host slots toward
    /// it).  Returns the handoff envelope to deliver; the envelope names
    /// `peer` as the one new owner, so it can be broadcast to the whole
    /// group without minting extra owners.  Clipboard forwarding is disarmed
    /// from this point.
    pub fn release_focus_to(&mut self, peer: PeerId) -> SyncEnvelope {
        info!(to = %peer, "releasing focus");
        self.focus = FocusOwner::Peer(peer);
        self.bus
            .publish(DaemonEvent::Flow(FlowEvent::FocusChanged { owner: Some(peer) }));
        SyncEnvelope::focus_handoff(self.local_peer, self.allocate_sequence(), peer)
    }

    /// Wraps local clipboard content for delivery to peers.
    ///
    /// # Errors
    ///
    /// Returns [`NotFocusOwner`] while a peer owns focus; only the owner
    /// forwards clipboard content.
    pub fn forward_clipboard(&mut self, payload: Vec<u8>) -> Result<SyncEnvelope, NotFocusOwner> {
        if !self.owns_focus() {
            return Err(NotFocusOwner);
        }
        Ok(SyncEnvelope::clipboard(self.local_peer, self.allocate_sequence(), payload))
    }

    /// Clears replay history for a peer that unpaired; if it re-pairs it
    /// starts a fresh sequence space.
    pub fn forget_peer(&mut self, peer: &PeerId) {
        self.replay.forget(peer);
        if self.focus == FocusOwner::Peer(*peer) {
            // The owner vanished; reclaim focus locally.
            info!(%peer, "focus owner unpaired; reclaiming focus");
            self.focus = FocusOwner::Local;
            self.bus
                .publish(DaemonEvent::Flow(FlowEvent::FocusChanged { owner: None }));
        }
    }

    fn allocate_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
