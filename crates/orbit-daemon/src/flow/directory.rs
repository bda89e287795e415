//! LAN peer directory fed by UDP broadcast discovery.
//!
//! Every instance periodically broadcasts a JSON [`PeerAnnounce`] on the
//! discovery port and listens for everyone else's.  Received announcements
//! are upserted into the directory with a `last_seen` refresh; a sweep task
//! drops peers that have gone quiet past the liveness timeout.
//!
//! The socket and its three tasks are reference-counted: the first
//! [`acquire`](PeerDirectory::acquire) binds and spawns, the last dropped
//! [`DirectoryGuard`] aborts the tasks and releases the socket.  Nothing
//! keeps announcing after the last consumer is gone.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orbit_core::flow::announce::PeerAnnounce;
use orbit_core::flow::envelope::PeerId;

use crate::config::FlowConfig;
use crate::events::{DaemonEvent, EventBus, FlowEvent};

/// Error type for directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The discovery socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The configured bind address is not a valid IP address.
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
}

/// Where a peer stands in the pairing handshake.
///
/// Transitions only move forward (`Unpaired → Pairing → Paired`) or reset to
/// `Unpaired`; a paired peer never silently drops back to `Pairing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    Pairing,
    Paired,
}

impl PairingState {
    /// Whether moving from `self` to `next` is a legal transition.
    fn allows(self, next: PairingState) -> bool {
        matches!(
            (self, next),
            (_, PairingState::Unpaired)
                | (PairingState::Unpaired, PairingState::Pairing)
                | (PairingState::Pairing, PairingState::Paired)
        )
    }
}

/// One known peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub name: String,
    /// Address the last announce arrived from.
    pub addr: SocketAddr,
    /// TCP port the peer's sync transport listens on.
    pub sync_port: u16,
    pub last_seen: Instant,
    pub pairing_state: PairingState,
}

impl PeerRecord {
    /// Socket address of the peer's sync transport.
    pub fn sync_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), self.sync_port)
    }
}

struct RuntimeState {
    refcount: usize,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    records: Mutex<HashMap<PeerId, PeerRecord>>,
    runtime: Mutex<RuntimeState>,
}

/// The peer directory.  Cheap to clone; all clones share one record set and
/// one discovery runtime.
#[derive(Clone)]
pub struct PeerDirectory {
    shared: Arc<Shared>,
    /// Serializes acquire calls so the socket is bound at most once.
    acquire_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Keeps the discovery runtime alive.  Dropping the last guard stops
/// announce/browse/sweep and releases the socket.
pub struct DirectoryGuard {
    shared: Arc<Shared>,
}

impl Drop for DirectoryGuard {
    fn drop(&mut self) {
        let mut runtime = match self.shared.runtime.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runtime.refcount -= 1;
        if runtime.refcount == 0 {
            for task in runtime.tasks.drain(..) {
                task.abort();
            }
            info!("discovery runtime released");
        }
    }
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(HashMap::new()),
                runtime: Mutex::new(RuntimeState { refcount: 0, tasks: Vec::new() }),
            }),
            acquire_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Attaches a consumer to the discovery runtime, starting it if this is
    /// the first one.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::BindFailed`] when the discovery socket
    /// cannot be bound (the refcount is left untouched).
    pub async fn acquire(
        &self,
        config: &FlowConfig,
        identity: PeerAnnounce,
        bus: EventBus,
    ) -> Result<DirectoryGuard, DirectoryError> {
        let _serialize = self.acquire_lock.lock().await;

        let need_start = self.lock_runtime().refcount == 0;
        if need_start {
            let ip: std::net::IpAddr = config
                .bind_address
                .parse()
                .map_err(|_| DirectoryError::InvalidBindAddress(config.bind_address.clone()))?;
            let addr = SocketAddr::new(ip, config.discovery_port);
            let socket = UdpSocket::bind(addr)
                .await
                .map_err(|source| DirectoryError::BindFailed { addr, source })?;
            socket.set_broadcast(true).ok();
            let socket = Arc::new(socket);
            info!("discovery listening on UDP {addr}");

            let own_id = identity.peer_id;
            let tasks = vec![
                tokio::spawn(announce_loop(
                    Arc::clone(&socket),
                    identity,
                    config.discovery_port,
                    config.announce_interval(),
                )),
                tokio::spawn(browse_loop(
                    Arc::clone(&socket),
                    Arc::clone(&self.shared),
                    bus.clone(),
                    own_id,
                )),
                tokio::spawn(sweep_loop(
                    Arc::clone(&self.shared),
                    bus,
                    config.liveness_timeout(),
                )),
            ];
            self.lock_runtime().tasks = tasks;
        }

        self.lock_runtime().refcount += 1;
        Ok(DirectoryGuard { shared: Arc::clone(&self.shared) })
    }

    /// Whether the discovery runtime currently has any consumer.
    pub fn is_active(&self) -> bool {
        self.lock_runtime().refcount > 0
    }

    /// All currently known peers.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.lock_records().values().cloned().collect()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.lock_records().get(peer_id).cloned()
    }

    pub fn is_paired(&self, peer_id: &PeerId) -> bool {
        self.lock_records()
            .get(peer_id)
            .map(|r| r.pairing_state == PairingState::Paired)
            .unwrap_or(false)
    }

    /// Moves a peer's pairing state.  Illegal transitions (anything that
    /// would silently demote a paired peer, or skip the pairing step) are
    /// ignored with a warning.  Returns whether the state changed.
    pub fn set_pairing_state(&self, peer_id: &PeerId, next: PairingState) -> bool {
        let mut records = self.lock_records();
        let Some(record) = records.get_mut(peer_id) else {
            warn!(%peer_id, ?next, "pairing transition for unknown peer ignored");
            return false;
        };
        if record.pairing_state == next {
            return false;
        }
        if !record.pairing_state.allows(next) {
            warn!(
                %peer_id,
                from = ?record.pairing_state,
                to = ?next,
                "illegal pairing transition ignored"
            );
            return false;
        }
        record.pairing_state = next;
        true
    }

    /// Records an announce, refreshing `last_seen`.  Returns `true` for a
    /// newly discovered peer.
    pub(crate) fn upsert(&self, announce: &PeerAnnounce, from: SocketAddr) -> bool {
        let mut records = self.lock_records();
        match records.get_mut(&announce.peer_id) {
            Some(record) => {
                record.last_seen = Instant::now();
                record.addr = from;
                record.sync_port = announce.sync_port;
                record.name = announce.name.clone();
                false
            }
            None => {
                records.insert(
                    announce.peer_id,
                    PeerRecord {
                        peer_id: announce.peer_id,
                        name: announce.name.clone(),
                        addr: from,
                        sync_port: announce.sync_port,
                        last_seen: Instant::now(),
                        pairing_state: PairingState::Unpaired,
                    },
                );
                true
            }
        }
    }

    /// Removes peers unseen for longer than `timeout`; returns the removed.
    fn sweep(&self, timeout: Duration, now: Instant) -> Vec<PeerRecord> {
        let mut records = self.lock_records();
        let stale: Vec<PeerId> = records
            .values()
            .filter(|r| now.duration_since(r.last_seen) > timeout)
            .map(|r| r.peer_id)
            .collect();
        stale.iter().filter_map(|id| records.remove(id)).collect()
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, PeerRecord>> {
        match self.shared.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_runtime(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        match self.shared.runtime.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcasts our announce at the configured interval.
async fn announce_loop(
    socket: Arc<UdpSocket>,
    identity: PeerAnnounce,
    discovery_port: u16,
    interval: Duration,
) {
    let target = SocketAddr::new(std::net::Ipv4Addr::BROADCAST.into(), discovery_port);
    let payload = match serde_json::to_vec(&identity) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "announce serialization failed; discovery disabled");
            return;
        }
    };

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&payload, target).await {
            warn!(error = %e, "failed to send discovery announce");
        }
    }
}

/// Receives peer announces and upserts them into the directory.
async fn browse_loop(socket: Arc<UdpSocket>, shared: Arc<Shared>, bus: EventBus, own_id: PeerId) {
    let directory = PeerDirectory {
        shared,
        acquire_lock: Arc::new(tokio::sync::Mutex::new(())),
    };
    let mut buf = vec![0u8; 2048];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "discovery recv error");
                continue;
            }
        };

        let announce: PeerAnnounce = match serde_json::from_slice(&buf[..len]) {
            Ok(a) => a,
            Err(e) => {
                debug!(%from, error = %e, "undecodable discovery datagram dropped");
                continue;
            }
        };

        if announce.version != PeerAnnounce::VERSION {
            debug!(%from, version = announce.version, "unknown announce version ignored");
            continue;
        }

        // Our own broadcast loops back; skip it.
        if announce.peer_id == own_id {
            continue;
        }

        if directory.upsert(&announce, from) {
            info!(peer = %announce.peer_id, name = %announce.name, %from, "peer discovered");
            bus.publish(DaemonEvent::Flow(FlowEvent::PeerDiscovered {
                peer_id: announce.peer_id,
                name: announce.name,
            }));
        }
    }
}

/// Sweep floor; `tokio::time::interval` panics on a zero period, and a
/// misconfigured liveness timeout of zero must not take the runtime down.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(500);

/// Sweeps run at half the liveness timeout, floored at [`MIN_SWEEP_PERIOD`].
fn sweep_period(liveness_timeout: Duration) -> Duration {
    (liveness_timeout / 2).max(MIN_SWEEP_PERIOD)
}

/// Periodically drops peers that have stopped announcing.
async fn sweep_loop(shared: Arc<Shared>, bus: EventBus, liveness_timeout: Duration) {
    let directory = PeerDirectory {
        shared,
        acquire_lock: Arc::new(tokio::sync::Mutex::new(())),
    };
    let mut ticker = tokio::time::interval(sweep_period(liveness_timeout));
    loop {
        ticker.tick().await;
        for record in directory.sweep(liveness_timeout, Instant::now()) {
            info!(peer = %record.peer_id, name = %record.name, "peer lost (liveness timeout)");
            bus.publish(DaemonEvent::Flow(FlowEvent::PeerLost { peer_id: record.peer_id }));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
