//! Flow: clipboard and focus synchronization between Orbit instances on the
//! same LAN.  Peers find each other over UDP broadcast, pair with one-time
//! codes, and exchange envelopes over a small TCP transport.

pub mod directory;
pub mod orchestrator;
pub mod pairing;
pub mod service;
pub mod transport;

pub use directory::{DirectoryError, DirectoryGuard, PairingState, PeerDirectory, PeerRecord};
pub use orchestrator::{FlowAction, FlowOrchestrator, FocusOwner};
pub use pairing::{PairingAuthority, PairingError};
pub use service::FlowService;
pub use transport::{SyncClient, SyncError, SyncServer};
