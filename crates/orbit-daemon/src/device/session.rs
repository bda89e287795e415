//! Request/response session with the pointing device.
//!
//! One session owns one transport.  All inbound reports pass through a single
//! pump task that routes responses to their in-flight requests by correlation
//! tag and turns unsolicited frames into typed [`Notification`]s.  The
//! feature table is rebuilt by discovery on every connect; indices from a
//! previous session are never trusted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orbit_core::protocol::features::{self, PING_ECHO};
use orbit_core::protocol::frame::{decode_report, DeviceErrorCode, Frame, InboundFrame};
use orbit_core::protocol::{FeatureTable, TagAllocator};

use crate::config::DeviceConfig;
use crate::device::transport::{DeviceTransport, TransportError};
use crate::events::BatterySnapshot;

/// Capacity of the notification broadcast channel.
const NOTIFY_CAPACITY: usize = 128;

/// Maximum requests waiting for a response at once; bounded by the 4-bit tag.
const MAX_IN_FLIGHT: usize = 15;

/// Error type for device session operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No response arrived within the configured timeout.
    #[error("device did not respond within {0:?}")]
    Timeout(Duration),

    /// The device cannot be reached or failed protocol validation.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device does not advertise the requested feature this session.
    #[error("feature 0x{0:04X} not advertised by device")]
    FeatureNotSupported(u16),

    /// The device answered with an error report.
    #[error("device rejected request: {code:?}")]
    Rejected { code: DeviceErrorCode },

    /// All correlation tags are in flight.
    #[error("too many requests in flight")]
    Busy,

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Typed unsolicited device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Battery(BatterySnapshot),
    /// The device moved to another host slot (confirmation of a switch, or a
    /// switch triggered from the device itself).
    HostChanged { slot: u8 },
    /// Bitmask of currently pressed diverted buttons.
    ButtonDiverted { buttons: u16 },
    Dpi(u16),
}

/// Last-known device state, updated by the notification pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub battery: Option<BatterySnapshot>,
    pub dpi: Option<u16>,
    pub current_host: Option<u8>,
}

/// State shared between the session handle and its pump task.
struct Shared {
    inflight: Mutex<HashMap<u8, oneshot::Sender<Result<Frame, DeviceError>>>>,
    features: RwLock<FeatureTable>,
    snapshot: Mutex<DeviceSnapshot>,
    notify_tx: broadcast::Sender<Notification>,
}

/// An established session with the device.
pub struct DeviceSession {
    transport: Arc<dyn DeviceTransport>,
    shared: Arc<Shared>,
    device_index: u8,
    timeout: Duration,
    tags: TagAllocator,
    /// Receiver drained by [`poll_notifications`](Self::poll_notifications);
    /// other consumers call [`subscribe`](Self::subscribe) for their own.
    own_rx: Mutex<broadcast::Receiver<Notification>>,
    pump: JoinHandle<()>,
}

impl DeviceSession {
    /// Connects: starts the pump, validates protocol support with a ping, and
    /// runs feature discovery (retried up to `config.discovery_retries` extra
    /// times).
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceUnavailable`] when the ping fails or
    /// every discovery attempt fails; the pump task is torn down before the
    /// error is returned.
    pub async fn connect(
        transport: Arc<dyn DeviceTransport>,
        config: &DeviceConfig,
        device_index: u8,
    ) -> Result<Self, DeviceError> {
        let (notify_tx, own_rx) = broadcast::channel(NOTIFY_CAPACITY);
        let shared = Arc::new(Shared {
            inflight: Mutex::new(HashMap::new()),
            features: RwLock::new(FeatureTable::new()),
            snapshot: Mutex::new(DeviceSnapshot::default()),
            notify_tx,
        });

        let pump = tokio::spawn(pump_loop(Arc::clone(&transport), Arc::clone(&shared)));

        let session = Self {
            transport,
            shared,
            device_index,
            timeout: config.request_timeout(),
            tags: TagAllocator::new(),
            own_rx: Mutex::new(own_rx),
            pump,
        };

        // Dropping the session on any failure path aborts the pump.
        session.ping().await?;
        session.discover_features(config.discovery_retries).await?;
        Ok(session)
    }

    /// Sends a request to a well-known feature and waits for the response.
    ///
    /// # Errors
    ///
    /// [`DeviceError::FeatureNotSupported`] when the device did not advertise
    /// the feature this session, plus everything
    /// [`raw_request`](Self::raw_request) can return.
    pub async fn send_request(
        &self,
        feature_id: u16,
        function: u8,
        params: &[u8],
    ) -> Result<Frame, DeviceError> {
        let index = self
            .shared
            .features
            .read()
            .await
            .index_of(feature_id)
            .ok_or(DeviceError::FeatureNotSupported(feature_id))?;
        self.raw_request(index, function, params).await
    }

    /// Sends a request to a raw feature index.
    ///
    /// Allocates a correlation tag, registers it in the in-flight table, and
    /// waits for the pump to route the response back.  A timed-out tag is
    /// deregistered so a late response is logged and dropped instead of being
    /// misdelivered to a newer request.
    async fn raw_request(
        &self,
        feature_index: u8,
        function: u8,
        params: &[u8],
    ) -> Result<Frame, DeviceError> {
        let (tag, rx) = {
            let mut inflight = self.shared.inflight.lock().await;
            if inflight.len() >= MAX_IN_FLIGHT {
                return Err(DeviceError::Busy);
            }
            // The allocator cycles; skip tags still waiting on a response.
            let mut tag = self.tags.next();
            while inflight.contains_key(&tag) {
                tag = self.tags.next();
            }
            let (tx, rx) = oneshot::channel();
            inflight.insert(tag, tx);
            (tag, rx)
        };

        let frame = Frame::request(self.device_index, feature_index, function, tag, params);
        if let Err(e) = self.transport.send(&frame.encode()).await {
            self.shared.inflight.lock().await.remove(&tag);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            // Pump dropped the sender: session is going away.
            Ok(Err(_)) => Err(DeviceError::DeviceUnavailable("session closed".into())),
            Err(_) => {
                self.shared.inflight.lock().await.remove(&tag);
                Err(DeviceError::Timeout(self.timeout))
            }
        }
    }

    /// Validates protocol support: the root ping must echo our byte back.
    async fn ping(&self) -> Result<(), DeviceError> {
        // The root feature is always at index 0, before any discovery.
        let response = self
            .raw_request(0x00, features::root::PING, &[0x00, 0x00, PING_ECHO])
            .await?;
        if response.params[2] != PING_ECHO {
            return Err(DeviceError::DeviceUnavailable(format!(
                "ping echoed 0x{:02X}, expected 0x{PING_ECHO:02X}",
                response.params[2]
            )));
        }
        Ok(())
    }

    /// Enumerates the device's features and rebuilds the feature table.
    ///
    /// Retried up to `retries` extra times; the table is cleared before each
    /// attempt so a half-finished enumeration never survives.
    async fn discover_features(&self, retries: u32) -> Result<(), DeviceError> {
        let mut last_err = None;
        for attempt in 0..=retries {
            match self.enumerate_features().await {
                Ok(count) => {
                    info!(features = count, "feature discovery complete");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "feature discovery attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(DeviceError::DeviceUnavailable(format!(
            "feature discovery failed after {} attempts: {}",
            retries + 1,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn enumerate_features(&self) -> Result<usize, DeviceError> {
        self.shared.features.write().await.clear();

        // Locate the feature-set feature through the root.
        let id_bytes = features::FEATURE_SET.to_be_bytes();
        let response = self
            .raw_request(0x00, features::root::GET_FEATURE, &[id_bytes[0], id_bytes[1]])
            .await?;
        let set_index = response.params[0];

        let response = self
            .raw_request(set_index, features::feature_set::GET_COUNT, &[])
            .await?;
        let count = response.params[0];

        let mut table = FeatureTable::new();
        table.insert(features::ROOT, 0x00);
        table.insert(features::FEATURE_SET, set_index);

        // Indices are 1-based; index 0 is the root itself.
        for index in 1..=count {
            let response = self
                .raw_request(set_index, features::feature_set::GET_FEATURE_ID, &[index])
                .await?;
            let feature_id = u16::from_be_bytes([response.params[0], response.params[1]]);
            debug!(feature_id = format!("0x{feature_id:04X}"), index, "discovered feature");
            table.insert(feature_id, index);
        }

        let len = table.len();
        *self.shared.features.write().await = table;
        Ok(len)
    }

    /// Whether the device advertises a feature this session.
    pub async fn supports(&self, feature_id: u16) -> bool {
        self.shared.features.read().await.index_of(feature_id).is_some()
    }

    /// The device index this session talks to.
    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    /// A fresh receiver for typed notifications; each subscriber sees every
    /// notification published after it subscribes, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.notify_tx.subscribe()
    }

    /// Drains and returns the notifications that arrived since the last call.
    pub async fn poll_notifications(&self) -> Vec<Notification> {
        let mut rx = self.own_rx.lock().await;
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(n) => out.push(n),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification poller lagged; events lost");
                }
                Err(_) => break,
            }
        }
        out
    }

    /// Last-known device state.
    pub async fn snapshot(&self) -> DeviceSnapshot {
        *self.shared.snapshot.lock().await
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        // Stops the pump on every exit path, releasing the transport's read
        // half and waking nothing that should not be woken.
        self.pump.abort();
    }
}

/// Reads, decodes, and routes inbound reports until the transport closes.
async fn pump_loop(transport: Arc<dyn DeviceTransport>, shared: Arc<Shared>) {
    loop {
        let bytes = match transport.recv().await {
            Ok(bytes) => bytes,
            Err(e) => {
                info!(error = %e, "device transport closed; failing in-flight requests");
                let mut inflight = shared.inflight.lock().await;
                for (_, tx) in inflight.drain() {
                    let _ = tx.send(Err(DeviceError::DeviceUnavailable(
                        "transport closed".into(),
                    )));
                }
                return;
            }
        };

        match decode_report(&bytes) {
            Ok(InboundFrame::Response(frame)) => {
                let waiter = shared.inflight.lock().await.remove(&frame.sw_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(frame));
                    }
                    None => {
                        warn!(tag = frame.sw_id, "response with no in-flight request; dropped");
                    }
                }
            }
            Ok(InboundFrame::DeviceError { sw_id, code, feature_index, function, .. }) => {
                let waiter = shared.inflight.lock().await.remove(&sw_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Err(DeviceError::Rejected { code }));
                    }
                    None => {
                        warn!(
                            tag = sw_id,
                            feature_index,
                            function,
                            ?code,
                            "error report with no in-flight request; dropped"
                        );
                    }
                }
            }
            Ok(InboundFrame::Notification(frame)) => {
                let feature_id = shared.features.read().await.id_at(frame.feature_index);
                let Some(notification) = classify_notification(feature_id, &frame) else {
                    debug!(
                        feature_index = frame.feature_index,
                        "notification for untracked feature; dropped"
                    );
                    continue;
                };
                if update_snapshot(&mut *shared.snapshot.lock().await, notification) {
                    let _ = shared.notify_tx.send(notification);
                }
            }
            Err(e) => {
                // Recoverable: log and drop the frame, keep the session up.
                warn!(error = %e, "malformed report dropped");
            }
        }
    }
}

/// Maps a notification frame to a typed event based on the feature it came
/// from.  Returns `None` for features the daemon does not track.
fn classify_notification(feature_id: Option<u16>, frame: &Frame) -> Option<Notification> {
    match feature_id? {
        features::UNIFIED_BATTERY => Some(Notification::Battery(BatterySnapshot {
            percent: frame.params[0],
            charging: frame.params[2] != 0,
        })),
        features::BATTERY_STATUS => Some(Notification::Battery(BatterySnapshot {
            // Legacy battery reports carry no charging flag.
            percent: frame.params[0],
            charging: false,
        })),
        features::CHANGE_HOST => Some(Notification::HostChanged { slot: frame.params[0] }),
        features::DIVERTED_BUTTONS => Some(Notification::ButtonDiverted {
            buttons: u16::from_be_bytes([frame.params[0], frame.params[1]]),
        }),
        features::ADJUSTABLE_DPI => Some(Notification::Dpi(u16::from_be_bytes([
            frame.params[0],
            frame.params[1],
        ]))),
        _ => None,
    }
}

/// Applies a notification to the snapshot.  Returns `false` when the event
/// repeats the stored state and should be coalesced away; button events are
/// never coalesced because every transition matters to the gesture layer.
fn update_snapshot(snapshot: &mut DeviceSnapshot, notification: Notification) -> bool {
    match notification {
        Notification::Battery(battery) => {
            if snapshot.battery == Some(battery) {
                return false;
            }
            snapshot.battery = Some(battery);
            true
        }
        Notification::HostChanged { slot } => {
            if snapshot.current_host == Some(slot) {
                return false;
            }
            snapshot.current_host = Some(slot);
            true
        }
        Notification::Dpi(dpi) => {
            if snapshot.dpi == Some(dpi) {
                return false;
            }
            snapshot.dpi = Some(dpi);
            true
        }
        Notification::ButtonDiverted { .. } => true,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::ChannelTransport;
    use orbit_core::protocol::frame::{ReportKind, ERROR_FEATURE_INDEX, LONG_PARAM_LEN};

    const DEVICE_INDEX: u8 = 0x01;
    const FEATURE_SET_INDEX: u8 = 0x01;

    /// Features a fake device advertises, in enumeration order (index 1..).
    const FAKE_FEATURES: &[u16] = &[
        features::FEATURE_SET,
        features::UNIFIED_BATTERY,
        features::CHANGE_HOST,
        features::DIVERTED_BUTTONS,
        features::ADJUSTABLE_DPI,
    ];

    fn response_frame(request: &Frame, params: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; LONG_PARAM_LEN];
        buf[..params.len()].copy_from_slice(params);
        Frame {
            report: request.report,
            device_index: request.device_index,
            feature_index: request.feature_index,
            function: request.function,
            sw_id: request.sw_id,
            params: buf,
        }
        .encode()
    }

    fn notification_frame(feature_index: u8, params: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; LONG_PARAM_LEN];
        buf[..params.len()].copy_from_slice(params);
        Frame {
            report: ReportKind::Long,
            device_index: DEVICE_INDEX,
            feature_index,
            function: 0,
            sw_id: 0,
            params: buf,
        }
        .encode()
    }

    fn decode_request(bytes: &[u8]) -> Frame {
        match decode_report(bytes).expect("valid request") {
            InboundFrame::Response(f) | InboundFrame::Notification(f) => f,
            InboundFrame::DeviceError { .. } => panic!("request decoded as error"),
        }
    }

    /// Answers ping and feature enumeration like a well-behaved device, then
    /// keeps serving battery/host/dpi queries until the transport drops.
    async fn run_fake_device(transport: ChannelTransport) {
        while let Ok(bytes) = transport.recv().await {
            let request = decode_request(&bytes);
            let reply = fake_reply(&request);
            if transport.send(&reply).await.is_err() {
                break;
            }
        }
    }

    fn fake_reply(request: &Frame) -> Vec<u8> {
        match (request.feature_index, request.function) {
            // Root ping echoes the data byte.
            (0x00, features::root::PING) => {
                response_frame(request, &[0, 0, request.params[2]])
            }
            // Root getFeature: only the feature set is ever asked for.
            (0x00, features::root::GET_FEATURE) => {
                response_frame(request, &[FEATURE_SET_INDEX])
            }
            (FEATURE_SET_INDEX, features::feature_set::GET_COUNT) => {
                response_frame(request, &[FAKE_FEATURES.len() as u8])
            }
            (FEATURE_SET_INDEX, features::feature_set::GET_FEATURE_ID) => {
                let index = request.params[0] as usize;
                let id = FAKE_FEATURES[index - 1].to_be_bytes();
                response_frame(request, &[id[0], id[1]])
            }
            _ => response_frame(request, &[]),
        }
    }

    async fn connected_session() -> (DeviceSession, tokio::task::JoinHandle<()>) {
        let (daemon_side, device_side) = ChannelTransport::pair();
        let device = tokio::spawn(run_fake_device(device_side));
        let session = DeviceSession::connect(
            Arc::new(daemon_side),
            &crate::config::DeviceConfig::default(),
            DEVICE_INDEX,
        )
        .await
        .expect("connect");
        (session, device)
    }

    #[tokio::test]
    async fn test_connect_builds_feature_table_from_discovery() {
        // Arrange / Act
        let (session, _device) = connected_session().await;

        // Assert
        assert!(session.supports(features::UNIFIED_BATTERY).await);
        assert!(session.supports(features::CHANGE_HOST).await);
        assert!(session.supports(features::DIVERTED_BUTTONS).await);
        assert!(!session.supports(features::BATTERY_STATUS).await);
    }

    #[tokio::test]
    async fn test_send_request_to_unadvertised_feature_fails_without_wire_traffic() {
        let (session, _device) = connected_session().await;

        let result = session.send_request(features::BATTERY_STATUS, 0x00, &[]).await;
        assert!(matches!(result, Err(DeviceError::FeatureNotSupported(id)) if id == features::BATTERY_STATUS));
    }

    #[tokio::test]
    async fn test_connect_fails_when_ping_echo_is_wrong() {
        // Arrange: a device that answers the ping with the wrong byte
        let (daemon_side, device_side) = ChannelTransport::pair();
        tokio::spawn(async move {
            while let Ok(bytes) = device_side.recv().await {
                let request = decode_request(&bytes);
                let reply = response_frame(&request, &[0, 0, 0x55]);
                if device_side.send(&reply).await.is_err() {
                    break;
                }
            }
        });

        // Act
        let result = DeviceSession::connect(
            Arc::new(daemon_side),
            &crate::config::DeviceConfig::default(),
            DEVICE_INDEX,
        )
        .await;

        // Assert
        assert!(matches!(result, Err(DeviceError::DeviceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_request_times_out_when_device_is_silent() {
        // Arrange: transport whose device side never answers
        let (daemon_side, _device_side) = ChannelTransport::pair();
        let config = crate::config::DeviceConfig {
            request_timeout_ms: 50,
            discovery_retries: 0,
            ..Default::default()
        };

        // Act: connect itself must time out on the ping
        let start = std::time::Instant::now();
        let result = DeviceSession::connect(Arc::new(daemon_side), &config, DEVICE_INDEX).await;

        // Assert
        assert!(matches!(result, Err(DeviceError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(2), "timeout must be bounded");
    }

    #[tokio::test]
    async fn test_device_error_report_is_routed_to_its_request() {
        // Arrange: a device that rejects everything after connect
        let (daemon_side, device_side) = ChannelTransport::pair();
        tokio::spawn(async move {
            let mut connected = false;
            let mut served = 0usize;
            while let Ok(bytes) = device_side.recv().await {
                let request = decode_request(&bytes);
                // Serve ping + discovery (1 getFeature + 1 count + N ids),
                // then start rejecting.
                let discovery_replies = 3 + FAKE_FEATURES.len();
                let reply = if connected {
                    // Error report: [0x10, dev, 0xFF, feature, fn<<4|sw, code]
                    vec![
                        0x10,
                        request.device_index,
                        ERROR_FEATURE_INDEX,
                        request.feature_index,
                        (request.function << 4) | request.sw_id,
                        0x06, // busy
                        0x00,
                    ]
                } else {
                    served += 1;
                    if served == discovery_replies {
                        connected = true;
                    }
                    fake_reply(&request)
                };
                if device_side.send(&reply).await.is_err() {
                    break;
                }
            }
        });
        let session = DeviceSession::connect(
            Arc::new(daemon_side),
            &crate::config::DeviceConfig::default(),
            DEVICE_INDEX,
        )
        .await
        .expect("connect");

        // Act
        let result = session
            .send_request(features::CHANGE_HOST, features::change_host::GET_HOST_INFO, &[])
            .await;

        // Assert
        assert!(
            matches!(result, Err(DeviceError::Rejected { code: DeviceErrorCode::Busy })),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_battery_notification_updates_snapshot_and_broadcasts() {
        // Arrange: a device that serves connect, then pushes one battery
        // notification unprompted.
        let battery_index = 2; // position of UNIFIED_BATTERY in FAKE_FEATURES
        let (daemon_side, device_side) = ChannelTransport::pair();
        let device = tokio::spawn(async move {
            // Serve connect, then push one battery notification.
            let discovery_replies = 3 + FAKE_FEATURES.len();
            for _ in 0..discovery_replies {
                let bytes = match device_side.recv().await {
                    Ok(b) => b,
                    Err(_) => return,
                };
                let request = decode_request(&bytes);
                if device_side.send(&fake_reply(&request)).await.is_err() {
                    return;
                }
            }
            // Wait for the test's trigger request so the push cannot beat
            // the subscription, then answer it and push the notification.
            let bytes = match device_side.recv().await {
                Ok(b) => b,
                Err(_) => return,
            };
            let request = decode_request(&bytes);
            if device_side.send(&fake_reply(&request)).await.is_err() {
                return;
            }
            let _ = device_side
                .send(&notification_frame(battery_index, &[87, 0, 1]))
                .await;
            // Keep the transport open until the test finishes.
            let _ = device_side.recv().await;
        });

        let session = DeviceSession::connect(
            Arc::new(daemon_side),
            &crate::config::DeviceConfig::default(),
            DEVICE_INDEX,
        )
        .await
        .expect("connect");
        let mut rx = session.subscribe();
        // Trigger the device's push only after subscribing.
        session
            .send_request(features::UNIFIED_BATTERY, 0x00, &[])
            .await
            .expect("trigger request");

        // Assert
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("notification in time")
            .expect("channel open");
        assert_eq!(
            event,
            Notification::Battery(BatterySnapshot { percent: 87, charging: true })
        );
        assert_eq!(
            session.snapshot().await.battery,
            Some(BatterySnapshot { percent: 87, charging: true })
        );

        device.abort();
    }

    #[tokio::test]
    async fn test_sixteenth_concurrent_request_is_rejected_as_busy() {
        // Arrange: a device that serves connect, then goes silent so every
        // request stays in flight until its timeout.
        let (daemon_side, device_side) = ChannelTransport::pair();
        tokio::spawn(async move {
            let discovery_replies = 3 + FAKE_FEATURES.len();
            for _ in 0..discovery_replies {
                let bytes = match device_side.recv().await {
                    Ok(b) => b,
                    Err(_) => return,
                };
                let request = decode_request(&bytes);
                if device_side.send(&fake_reply(&request)).await.is_err() {
                    return;
                }
            }
            // Swallow everything else without answering.
            while device_side.recv().await.is_ok() {}
        });
        let config = crate::config::DeviceConfig {
            request_timeout_ms: 10_000,
            ..Default::default()
        };
        let session = Arc::new(
            DeviceSession::connect(Arc::new(daemon_side), &config, DEVICE_INDEX)
                .await
                .expect("connect"),
        );

        // Act: saturate all fifteen correlation tags.
        for _ in 0..MAX_IN_FLIGHT {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let _ = session.send_request(features::CHANGE_HOST, 0x00, &[]).await;
            });
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while session.shared.inflight.lock().await.len() < MAX_IN_FLIGHT {
            assert!(std::time::Instant::now() < deadline, "requests never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Assert: the next request is rejected immediately, not queued.
        let result = session.send_request(features::CHANGE_HOST, 0x00, &[]).await;
        assert!(matches!(result, Err(DeviceError::Busy)), "got {result:?}");
    }

    #[test]
    fn test_classify_notification_maps_tracked_features() {
        let frame = Frame::request(DEVICE_INDEX, 0x05, 0, 0, &[50, 0, 0]);

        assert_eq!(
            classify_notification(Some(features::UNIFIED_BATTERY), &frame),
            Some(Notification::Battery(BatterySnapshot { percent: 50, charging: false }))
        );
        assert_eq!(
            classify_notification(Some(features::CHANGE_HOST), &frame),
            Some(Notification::HostChanged { slot: 50 })
        );
        assert_eq!(classify_notification(Some(0x9999), &frame), None);
        assert_eq!(classify_notification(None, &frame), None);
    }

    #[test]
    fn test_snapshot_coalesces_repeated_values_but_not_button_events() {
        let mut snapshot = DeviceSnapshot::default();
        let battery = Notification::Battery(BatterySnapshot { percent: 60, charging: false });

        assert!(update_snapshot(&mut snapshot, battery), "first value publishes");
        assert!(!update_snapshot(&mut snapshot, battery), "repeat coalesced");

        let buttons = Notification::ButtonDiverted { buttons: 0x0001 };
        assert!(update_snapshot(&mut snapshot, buttons));
        assert!(update_snapshot(&mut snapshot, buttons), "button repeats pass through");
    }
}
