//! Glues the sync boundary to pairing, directory, and orchestration state.
//!
//! The transport only moves envelopes and asks two questions: is this origin
//! trusted, and what happens to an accepted body.  This service answers both.
//! It also owns the local half of the pairing handshake: a UI surface asks it
//! to start pairing, it issues the code and moves the peer to `Pairing`, and
//! the peer's later `/pair` submission completes or resets the handshake.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use orbit_core::flow::envelope::{PeerId, SyncEnvelope};

use crate::config::FlowConfig;
use crate::events::{DaemonEvent, EventBus, FlowEvent};
use crate::flow::directory::{PairingState, PeerDirectory};
use crate::flow::orchestrator::{FlowAction, FlowOrchestrator};
use crate::flow::pairing::{PairingAuthority, PairingError};
use crate::flow::transport::SyncHandler;

pub struct FlowService {
    authority: Mutex<PairingAuthority>,
    orchestrator: Mutex<FlowOrchestrator>,
    directory: PeerDirectory,
    bus: EventBus,
}

impl FlowService {
    pub fn new(config: &FlowConfig, directory: PeerDirectory, bus: EventBus) -> Self {
        Self {
            authority: Mutex::new(PairingAuthority::new(config.pairing_code_ttl())),
            orchestrator: Mutex::new(FlowOrchestrator::new(config.peer_id, bus.clone())),
            directory,
            bus,
        }
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Starts the pairing handshake with a discovered peer.  Returns the code
    /// the UI shows to the user; the peer completes the handshake by
    /// submitting it over `/pair`.
    ///
    /// # Errors
    ///
    /// Returns [`PairingError::AlreadyPaired`] for a peer that is already
    /// paired.
    pub async fn start_pairing(&self, peer_id: PeerId) -> Result<String, PairingError> {
        let code = self.authority.lock().await.issue_code(peer_id)?;
        self.directory.set_pairing_state(&peer_id, PairingState::Pairing);
        Ok(code)
    }

    /// Severs a pairing.  The peer must run the full handshake again, and its
    /// replay history is discarded so a re-pair starts a fresh sequence space.
    pub async fn unpair(&self, peer_id: PeerId) {
        self.authority.lock().await.unpair(&peer_id);
        self.directory.set_pairing_state(&peer_id, PairingState::Unpaired);
        self.orchestrator.lock().await.forget_peer(&peer_id);
    }

    /// Hands focus to `peer`.  The returned envelope names `peer` as the one
    /// new owner and must be delivered to the paired peers.
    pub async fn release_focus_to(&self, peer: PeerId) -> SyncEnvelope {
        self.orchestrator.lock().await.release_focus_to(peer)
    }
}

#[async_trait]
impl SyncHandler for FlowService {
    fn is_trusted(&self, origin: &PeerId) -> bool {
        self.directory.is_paired(origin)
    }

    async fn handle_envelope(&self, envelope: SyncEnvelope) {
        let action = self.orchestrator.lock().await.handle_envelope(envelope);
        match action {
            Some(FlowAction::ApplyClipboard(payload)) => {
                // Clipboard integration is delegated to the UI surface; the
                // daemon announces that new content is available.
                info!(bytes = payload.len(), "clipboard content received from focus owner");
                self.bus
                    .publish(DaemonEvent::Flow(FlowEvent::ClipboardReceived { payload }));
            }
            Some(FlowAction::FocusGained { from }) => {
                info!(%from, "input focus is now local");
            }
            None => {}
        }
    }

    async fn handle_pair(&self, origin: PeerId, code: &str) -> Result<(), PairingError> {
        let result = self.authority.lock().await.verify(origin, code);
        match &result {
            Ok(()) => {
                self.directory.set_pairing_state(&origin, PairingState::Paired);
                self.bus
                    .publish(DaemonEvent::Flow(FlowEvent::PeerPaired { peer_id: origin }));
            }
            Err(_) => {
                // Any rejection invalidates the handshake.
                self.directory.set_pairing_state(&origin, PairingState::Unpaired);
            }
        }
        result
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
