//! Discovery announcement datagram.

use serde::{Deserialize, Serialize};

use crate::flow::envelope::PeerId;

/// JSON datagram broadcast on the discovery port.
///
/// Receivers learn the sender's address from the datagram source, so only
/// the sync port travels in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAnnounce {
    pub peer_id: PeerId,
    /// Human-readable instance name shown in pairing UIs.
    pub name: String,
    /// TCP port the sender's sync transport listens on.
    pub sync_port: u16,
    /// Announce format version; receivers ignore versions they don't know.
    pub version: u32,
}

impl PeerAnnounce {
    /// Current announce format version.
    pub const VERSION: u32 = 1;

    pub fn new(peer_id: PeerId, name: impl Into<String>, sync_port: u16) -> Self {
        Self { peer_id, name: name.into(), sync_port, version: Self::VERSION }
    }
}
