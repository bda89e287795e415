//! Sync envelope carried between paired instances.
//!
//! The envelope is the only thing the sync transport moves: a kind tag, the
//! originating peer, a per-origin sequence number, and an opaque payload.
//! What the payload means is the orchestrator's business.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a running instance, generated once at startup.
pub type PeerId = Uuid;

/// What a [`SyncEnvelope`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// Clipboard content pushed from the focus owner.
    Clipboard,
    /// The sender is handing input focus to the receiver.
    FocusHandoff,
}

/// One unit of synchronization between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub kind: SyncKind,
    /// Peer that produced this envelope (not necessarily the one that
    /// delivered it).
    pub origin: PeerId,
    /// Monotonically increasing per origin; lets receivers drop replays.
    pub sequence: u64,
    /// For focus handoffs: the single peer being made the new owner.
    /// Receivers that are not the target record the transfer without
    /// claiming ownership themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PeerId>,
    /// Opaque payload; clipboard bytes for `Clipboard`, empty for
    /// `FocusHandoff`.
    #[serde(with = "serde_bytes_base64")]
    pub payload: Vec<u8>,
}

/// Payload bytes travel as standard base64 (RFC 4648) inside the JSON
/// envelope so arbitrary clipboard content survives the trip.
mod serde_bytes_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl SyncEnvelope {
    pub fn clipboard(origin: PeerId, sequence: u64, payload: Vec<u8>) -> Self {
        Self { kind: SyncKind::Clipboard, origin, sequence, target: None, payload }
    }

    /// Hands focus from `origin` to exactly one peer, `target`.
    pub fn focus_handoff(origin: PeerId, sequence: u64, target: PeerId) -> Self {
        Self {
            kind: SyncKind::FocusHandoff,
            origin,
            sequence,
            target: Some(target),
            payload: Vec::new(),
        }
    }
}

/// Per-origin replay suppression.
///
/// An envelope is fresh only if its sequence is strictly greater than the
/// last one accepted from that origin; everything else is a replay (duplicate
/// delivery, retransmit, or an out-of-order straggler) and must be a no-op
/// for the caller.
#[derive(Debug, Default)]
pub struct ReplayFilter {
    last_accepted: HashMap<PeerId, u64>,
}

impl ReplayFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the envelope if fresh and says whether the caller should
    /// apply it.
    pub fn accept(&mut self, origin: PeerId, sequence: u64) -> bool {
        match self.last_accepted.get(&origin) {
            Some(&last) if sequence <= last => false,
            _ => {
                self.last_accepted.insert(origin, sequence);
                true
            }
        }
    }

    /// Drops the history for a peer, e.g. after it unpairs; a re-paired peer
    /// starts a fresh sequence.
    pub fn forget(&mut self, origin: &PeerId) {
        self.last_accepted.remove(origin);
    }
}
