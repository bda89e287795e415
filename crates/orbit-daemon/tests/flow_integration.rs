//! Integration tests for the Flow stack: discovery, pairing, and sync.
//!
//! # Purpose
//!
//! These tests run two in-process "instances" against each other through the
//! same objects the daemon wires together: a [`PeerDirectory`] with a real
//! UDP discovery runtime on loopback, a [`FlowService`], and a
//! [`SyncServer`]/[`SyncClient`] pair over real TCP.  They verify:
//!
//! - Discovery: an announcing peer shows up in the other side's directory
//!   and starts out unpaired.
//! - Pairing: `start_pairing` opens the handshake, submitting the issued
//!   code over the wire pairs the peer, and reusing the consumed code is
//!   rejected.
//! - The transport boundary: unpaired senders and oversized payloads never
//!   reach the orchestrator.
//!
//! # The pairing flow
//!
//! ```text
//! Instance A                          Instance B
//! ──────────                          ──────────
//! flow.start_pairing(b)
//! Show code to user                   User types code
//!                                     POST /pair {code}
//! verify(b, code) → paired
//!                                     POST /sync {envelope}  → 200
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use orbit_core::flow::announce::PeerAnnounce;
use orbit_core::flow::envelope::{PeerId, SyncEnvelope};

use orbit_daemon::config::FlowConfig;
use orbit_daemon::events::{DaemonEvent, EventBus, FlowEvent};
use orbit_daemon::flow::transport::{SyncClient, SyncHandler, SyncServer};
use orbit_daemon::flow::{FlowService, PairingState, PeerDirectory};

/// One in-process Flow instance, wired the way `orbitd` wires it.
struct Instance {
    peer_id: PeerId,
    flow: Arc<FlowService>,
    server: SyncServer,
    events: broadcast::Receiver<DaemonEvent>,
}

impl Instance {
    async fn start() -> Self {
        let peer_id = Uuid::new_v4();
        let bus = EventBus::new();
        let events = bus.subscribe();
        let config = FlowConfig { peer_id, ..Default::default() };
        let flow = Arc::new(FlowService::new(&config, PeerDirectory::new(), bus));
        let server = SyncServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&flow) as Arc<dyn SyncHandler>,
            1024,
            Duration::from_secs(5),
        )
        .await
        .expect("bind sync server");
        Self { peer_id, flow, server, events }
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Two directories sharing a loopback discovery port find each other's
/// announces, and a newly seen peer starts out unpaired.
#[tokio::test]
async fn test_peers_discover_each_other_over_udp() {
    // Arrange: run A's discovery runtime on loopback and deliver B's
    // announce datagram at it directly (loopback broadcast semantics differ
    // per platform, so the datagram is sent unicast).
    let port = free_udp_port();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let dir_a = PeerDirectory::new();
    let _guard_a = dir_a
        .acquire(&flow_config(port), PeerAnnounce::new(a, "a", 1111), EventBus::new())
        .await
        .expect("acquire a");

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let announce = PeerAnnounce::new(b, "instance-b", 2222);
    let payload = serde_json::to_vec(&announce).unwrap();
    sender
        .send_to(&payload, ("127.0.0.1", port))
        .await
        .expect("send announce");

    // Assert: B appears in A's directory within the announce interval.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(record) = dir_a.get(&b) {
            assert_eq!(record.name, "instance-b");
            assert_eq!(record.sync_port, 2222);
            assert_eq!(record.pairing_state, PairingState::Unpaired);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "peer never appeared in the directory"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A directory ignores its own looped-back announce.
#[tokio::test]
async fn test_directory_ignores_its_own_announce() {
    let port = free_udp_port();
    let me = Uuid::new_v4();
    let dir = PeerDirectory::new();
    let _guard = dir
        .acquire(&flow_config(port), PeerAnnounce::new(me, "me", 1111), EventBus::new())
        .await
        .expect("acquire");

    // Feed it its own announce explicitly.
    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let payload = serde_json::to_vec(&PeerAnnounce::new(me, "me", 1111)).unwrap();
    sender.send_to(&payload, ("127.0.0.1", port)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dir.get(&me).is_none(), "own announce must not create a record");
}

// ── Pairing over the wire ─────────────────────────────────────────────────────

/// Full handshake through the service: discover, `start_pairing`, submit the
/// code over TCP, then sync.  Afterwards the consumed code is dead:
/// submitting it again is rejected.
#[tokio::test]
async fn test_pair_then_sync_then_reuse_is_rejected() {
    // Arrange: instance A knows about peer B through discovery.
    let mut a = Instance::start().await;
    let b_peer = Uuid::new_v4();
    seed_directory(&a, b_peer).await;

    // A's user asks to pair with B; the service issues the code and opens
    // the handshake.
    let code = a.flow.start_pairing(b_peer).await.expect("issue code");
    assert_eq!(
        a.flow.directory().get(&b_peer).unwrap().pairing_state,
        PairingState::Pairing
    );

    let client = SyncClient::new(b_peer);

    // Act: B submits the code over the wire.
    client
        .post_pair(a.server.local_addr(), &code)
        .await
        .expect("pairing accepted");
    assert!(a.flow.directory().is_paired(&b_peer));

    // B can now hand focus to A.
    let envelope = SyncEnvelope::focus_handoff(b_peer, 1, a.peer_id);
    client
        .post_sync(a.server.local_addr(), &envelope)
        .await
        .expect("sync accepted");
    expect_flow_event(&mut a.events, |e| {
        matches!(e, FlowEvent::PeerPaired { peer_id } if *peer_id == b_peer)
    })
    .await;
    expect_flow_event(&mut a.events, |e| {
        matches!(e, FlowEvent::FocusChanged { owner: None })
    })
    .await;

    // Assert: replaying the consumed code from another identity fails.
    let impostor = SyncClient::new(Uuid::new_v4());
    let result = impostor.post_pair(a.server.local_addr(), &code).await;
    assert!(
        matches!(result, Err(orbit_daemon::flow::SyncError::PeerRejected { status: 403 })),
        "consumed code must not pair anyone, got {result:?}"
    );
}

/// A wrong code leaves the peer unpaired and resets the handshake.
#[tokio::test]
async fn test_wrong_code_resets_the_handshake() {
    let a = Instance::start().await;
    let b_peer = Uuid::new_v4();
    seed_directory(&a, b_peer).await;

    let _code = a.flow.start_pairing(b_peer).await.expect("issue");

    let client = SyncClient::new(b_peer);
    let result = client.post_pair(a.server.local_addr(), "999999x").await;

    assert!(matches!(
        result,
        Err(orbit_daemon::flow::SyncError::PeerRejected { status: 403 })
    ));
    assert!(!a.flow.directory().is_paired(&b_peer));
    assert_eq!(
        a.flow.directory().get(&b_peer).unwrap().pairing_state,
        PairingState::Unpaired,
        "failed verification must reset the peer to unpaired"
    );
}

// ── Transport boundary ────────────────────────────────────────────────────────

/// Envelopes from unpaired peers never reach the orchestrator.
#[tokio::test]
async fn test_unpaired_sender_is_stopped_at_the_boundary() {
    let mut a = Instance::start().await;
    let stranger = Uuid::new_v4();

    let envelope = SyncEnvelope::clipboard(stranger, 1, b"malicious".to_vec());
    let result = SyncClient::new(stranger)
        .post_sync(a.server.local_addr(), &envelope)
        .await;

    assert!(matches!(
        result,
        Err(orbit_daemon::flow::SyncError::PeerRejected { status: 403 })
    ));
    assert!(
        matches!(a.events.try_recv(), Err(broadcast::error::TryRecvError::Empty)),
        "nothing may reach the orchestrator"
    );
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn flow_config(discovery_port: u16) -> FlowConfig {
    FlowConfig {
        bind_address: "127.0.0.1".to_string(),
        discovery_port,
        announce_interval_secs: 1,
        ..Default::default()
    }
}

/// Grabs a currently free UDP port on loopback.
fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("port bind");
    let port = socket.local_addr().expect("port addr").port();
    drop(socket);
    port
}

/// Waits for a matching Flow event on the instance's bus.
async fn expect_flow_event(
    events: &mut broadcast::Receiver<DaemonEvent>,
    matcher: impl Fn(&FlowEvent) -> bool,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("flow event within the deadline")
            .expect("bus open");
        if let DaemonEvent::Flow(flow_event) = &event {
            if matcher(flow_event) {
                return;
            }
        }
    }
}

/// Puts `peer` into `instance`'s directory via a real discovery datagram.
async fn seed_directory(instance: &Instance, peer: PeerId) {
    let port = free_udp_port();
    let _guard = instance
        .flow
        .directory()
        .acquire(
            &flow_config(port),
            PeerAnnounce::new(instance.peer_id, "local", instance.server.local_addr().port()),
            EventBus::new(),
        )
        .await
        .expect("acquire directory");

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let payload = serde_json::to_vec(&PeerAnnounce::new(peer, "remote", 4242)).unwrap();
    sender.send_to(&payload, ("127.0.0.1", port)).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while instance.flow.directory().get(&peer).is_none() {
        assert!(tokio::time::Instant::now() < deadline, "seed announce never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // The guard drops here; the record stays, only the runtime stops.
}
