//! Orbit daemon entry point.
//!
//! Wires the services together and runs until a shutdown signal:
//!
//! ```text
//! main()
//!  └─ load_config()           -- TOML, platform config dir
//!  └─ DeviceSession::connect  -- over the configuration tool's socket
//!       ├─ notification relay (Tokio task)
//!       └─ gesture driver     (Tokio task)
//!  └─ PeerDirectory::acquire  -- UDP announce/browse/sweep tasks
//!  └─ SyncServer::bind        -- TCP envelope listener
//!  └─ ControlServer::bind     -- Unix socket for the UI surfaces
//! ```
//!
//! A missing device is not fatal: Flow and the control socket keep running,
//! and device commands report the device as unavailable.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use orbit_core::flow::announce::PeerAnnounce;
use orbit_core::gesture::{MenuIntent, PointerPosition};

use orbit_daemon::config::{self, AppConfig};
use orbit_daemon::control::{
    ControlHandler, ControlRequest, ControlResponse, ControlServer, PeerSummary,
};
use orbit_daemon::device::session::{DeviceSession, Notification};
use orbit_daemon::device::transport::UnixSocketTransport;
use orbit_daemon::device::HostSwitchController;
use orbit_daemon::events::{DaemonEvent, DeviceState, EventBus, UiCommand};
use orbit_daemon::flow::transport::{SyncClient, SyncHandler, SyncServer};
use orbit_daemon::flow::{FlowService, PairingState, PeerDirectory};
use orbit_daemon::gesture_driver::{spawn_gesture_driver, DriverInput};

/// Translates UI requests from the control socket into Flow service calls,
/// device commands, and gesture-driver inputs.
struct DaemonControl {
    flow: Arc<FlowService>,
    commands: mpsc::Sender<UiCommand>,
    driver_input: mpsc::Sender<DriverInput>,
}

impl DaemonControl {
    async fn send_command(&self, command: UiCommand) -> ControlResponse {
        match self.commands.send(command).await {
            Ok(()) => ControlResponse::Ok,
            Err(_) => ControlResponse::Error { message: "daemon is shutting down".to_string() },
        }
    }
}

#[async_trait]
impl ControlHandler for DaemonControl {
    async fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::StartPairing { peer_id } => {
                match self.flow.start_pairing(peer_id).await {
                    Ok(code) => ControlResponse::PairingCode { code },
                    Err(e) => ControlResponse::Error { message: e.to_string() },
                }
            }
            ControlRequest::Unpair { peer_id } => {
                self.flow.unpair(peer_id).await;
                ControlResponse::Ok
            }
            ControlRequest::SwitchTo { index } => {
                self.send_command(UiCommand::SwitchTo { index }).await
            }
            ControlRequest::Select { action_id } => {
                self.send_command(UiCommand::Select { action_id }).await
            }
            ControlRequest::Pointer { x, y } => {
                let _ = self.driver_input.send(DriverInput::Pointer(PointerPosition { x, y })).await;
                ControlResponse::Ok
            }
            ControlRequest::Highlight { action_id } => {
                let _ = self.driver_input.send(DriverInput::Highlight(action_id)).await;
                ControlResponse::Ok
            }
            ControlRequest::ListPeers => {
                let peers = self
                    .flow
                    .directory()
                    .peers()
                    .into_iter()
                    .map(|p| PeerSummary {
                        peer_id: p.peer_id,
                        name: p.name,
                        paired: p.pairing_state == PairingState::Paired,
                    })
                    .collect();
                ControlResponse::Peers { peers }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_or_create_config();

    // Structured logging; `RUST_LOG` overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.daemon.log_level.clone())),
        )
        .init();

    info!("orbitd starting");

    let bus = EventBus::new();
    let sync_client = SyncClient::new(config.flow.peer_id);

    // ── Device session ────────────────────────────────────────────────────────
    let session = match connect_device(&config).await {
        Ok(session) => {
            bus.publish(DaemonEvent::Device(DeviceState::Connected));
            Some(Arc::new(session))
        }
        Err(e) => {
            error!(error = %e, "device unavailable at startup");
            bus.publish(DaemonEvent::Device(DeviceState::Unavailable));
            None
        }
    };

    // ── Flow: discovery, pairing, sync ────────────────────────────────────────
    let directory = PeerDirectory::new();
    let flow = Arc::new(FlowService::new(&config.flow, directory.clone(), bus.clone()));

    let identity = PeerAnnounce::new(
        config.flow.peer_id,
        config.daemon.instance_name.clone(),
        config.flow.sync_port,
    );
    let _directory_guard = match directory.acquire(&config.flow, identity, bus.clone()).await {
        Ok(guard) => Some(guard),
        Err(e) => {
            error!(error = %e, "peer discovery disabled");
            None
        }
    };

    let sync_addr = format!("{}:{}", config.flow.bind_address, config.flow.sync_port);
    let _sync_server = match sync_addr.parse() {
        Ok(addr) => match SyncServer::bind(
            addr,
            Arc::clone(&flow) as Arc<dyn SyncHandler>,
            config.flow.max_payload_bytes,
            config.flow.request_deadline(),
        )
        .await
        {
            Ok(server) => Some(server),
            Err(e) => {
                error!(error = %e, "sync transport disabled");
                None
            }
        },
        Err(e) => {
            error!(error = %e, addr = %sync_addr, "bad sync bind address");
            None
        }
    };

    // ── UI surface plumbing ───────────────────────────────────────────────────
    let (driver_input_tx, driver_input_rx) = mpsc::channel::<DriverInput>(64);
    let (command_tx, mut command_rx) = mpsc::channel::<UiCommand>(64);

    let control = Arc::new(DaemonControl {
        flow: Arc::clone(&flow),
        commands: command_tx,
        driver_input: driver_input_tx,
    });
    let _control_server =
        match ControlServer::bind(&config.daemon.control_socket_path, control).await {
            Ok(server) => Some(server),
            Err(e) => {
                error!(error = %e, "control socket disabled");
                None
            }
        };

    // ── Per-device tasks ──────────────────────────────────────────────────────
    if let Some(session) = &session {
        spawn_gesture_driver(
            session.subscribe(),
            driver_input_rx,
            bus.clone(),
            config.device.hold_threshold(),
        );
        tokio::spawn(relay_notifications(
            Arc::clone(session),
            Arc::clone(&flow),
            sync_client.clone(),
            bus.clone(),
        ));

        // Seed the UI with the current host list.
        let controller = HostSwitchController::new(Arc::clone(session));
        match controller.list_hosts().await {
            Ok(slots) => bus.publish(DaemonEvent::HostList(slots)),
            Err(e) => warn!(error = %e, "initial host list unavailable"),
        }
    } else {
        // No device means no gesture recognition; closing the channel makes
        // pointer feeds no-ops instead of backing up.
        drop(driver_input_rx);
    }

    // UI command pump.  Runs with or without a device so Flow commands keep
    // working while the device is away.
    let controller = session.as_ref().map(|s| HostSwitchController::new(Arc::clone(s)));
    let command_bus = bus.clone();
    tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command {
                UiCommand::SwitchTo { index } => match &controller {
                    Some(controller) => {
                        if let Err(e) = controller.switch_to(index).await {
                            warn!(error = %e, slot = index, "host switch failed");
                        }
                    }
                    None => warn!(slot = index, "host switch requested without a device"),
                },
                UiCommand::Select { action_id } => {
                    command_bus.publish(DaemonEvent::Menu(MenuIntent::Select { action_id }));
                }
            }
        }
    });

    info!("orbitd ready");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // The directory guard and the servers drop here, stopping their tasks.
    info!("orbitd stopped");
    Ok(())
}

/// Loads the config, writing the defaults back on first run so the generated
/// peer id survives restarts.
fn load_or_create_config() -> AppConfig {
    match config::load_config() {
        Ok(cfg) => {
            let first_run = config::config_file_path().map(|p| !p.exists()).unwrap_or(false);
            if first_run {
                if let Err(e) = config::save_config(&cfg) {
                    eprintln!("warning: could not persist initial config: {e}");
                }
            }
            cfg
        }
        Err(e) => {
            eprintln!("warning: config unusable ({e}); continuing with defaults");
            AppConfig::default()
        }
    }
}

async fn connect_device(
    config: &AppConfig,
) -> Result<DeviceSession, orbit_daemon::device::DeviceError> {
    let transport = UnixSocketTransport::connect(&config.device.socket_path).await?;
    // 0xFF addresses a directly attached device; receiver slots come later.
    DeviceSession::connect(Arc::new(transport), &config.device, 0xFF).await
}

/// Forwards device notifications to the UI bus and propagates host switches
/// to paired peers as focus handoffs.
async fn relay_notifications(
    session: Arc<DeviceSession>,
    flow: Arc<FlowService>,
    sync_client: SyncClient,
    bus: EventBus,
) {
    let mut notifications = session.subscribe();
    loop {
        let notification = match notifications.recv().await {
            Ok(n) => n,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "notification relay lagged");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        match notification {
            Notification::Battery(battery) => bus.publish(DaemonEvent::Battery(battery)),
            Notification::Dpi(dpi) => bus.publish(DaemonEvent::Dpi(dpi)),
            Notification::ButtonDiverted { .. } => {} // consumed by the gesture driver
            Notification::HostChanged { slot } => {
                info!(slot, "device moved to another host; handing focus off");
                let paired: Vec<_> = flow
                    .directory()
                    .peers()
                    .into_iter()
                    .filter(|p| p.pairing_state == PairingState::Paired)
                    .collect();
                if paired.is_empty() {
                    continue;
                }
                // Exactly one peer becomes the new owner; the envelope names
                // it, so the rest of the group just records the transfer.
                let new_owner = paired[0].peer_id;
                let envelope = flow.release_focus_to(new_owner).await;
                for peer in paired {
                    if let Err(e) = sync_client.post_sync(peer.sync_addr(), &envelope).await {
                        warn!(peer = %peer.peer_id, error = %e, "focus handoff delivery failed");
                    }
                }
            }
        }
    }
}
