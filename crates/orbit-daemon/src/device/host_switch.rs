//! Easy-Switch host-slot control.
//!
//! The device can be bonded to several hosts and points at exactly one of
//! them.  Switching away is fire-and-forget from the device's point of view:
//! the immediate response only acknowledges the request, and the actual move
//! is confirmed by a separate host-change notification.  `switch_to` reports
//! success only once that confirmation arrives.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use orbit_core::protocol::features::{self, change_host};

use crate::device::session::{DeviceError, DeviceSession, Notification};
use crate::events::HostSlot;

/// How long to wait for the device's confirming notification.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(3);

/// Error type for host switching.
#[derive(Debug, Error)]
pub enum HostSwitchError {
    /// The requested slot does not exist on this device.
    #[error("slot {requested} does not exist; device has {slot_count} host slot(s)")]
    InvalidSlot { requested: u8, slot_count: u8 },

    /// The device acknowledged the switch but never confirmed it.
    #[error("host switch not confirmed within {0:?}")]
    ConfirmationTimeout(Duration),

    /// The underlying request failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Queries and changes the device's host slot through a session.
pub struct HostSwitchController {
    session: Arc<DeviceSession>,
    confirm_timeout: Duration,
}

impl HostSwitchController {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session, confirm_timeout: CONFIRM_TIMEOUT }
    }

    /// Reads the slot count and current slot from the device.
    async fn host_info(&self) -> Result<(u8, u8), DeviceError> {
        let response = self
            .session
            .send_request(features::CHANGE_HOST, change_host::GET_HOST_INFO, &[])
            .await?;
        Ok((response.params[0], response.params[1]))
    }

    /// Returns every host slot the device reports, with stored names.
    ///
    /// # Errors
    ///
    /// Propagates [`DeviceError`] from the underlying requests.
    pub async fn list_hosts(&self) -> Result<Vec<HostSlot>, HostSwitchError> {
        let (slot_count, current) = self.host_info().await?;

        let mut slots = Vec::with_capacity(slot_count as usize);
        for index in 0..slot_count {
            let response = self
                .session
                .send_request(features::CHANGE_HOST, change_host::GET_HOST_NAME, &[index])
                .await?;
            // Name layout: [slot, length, utf8 bytes...].
            let len = (response.params[1] as usize).min(response.params.len() - 2);
            let name = String::from_utf8_lossy(&response.params[2..2 + len]).into_owned();
            slots.push(HostSlot { index, name, is_current: index == current });
        }
        debug!(slot_count, current, "listed host slots");
        Ok(slots)
    }

    /// Switches the device to `index`.
    ///
    /// The slot bound comes from the device right now, not from a cached
    /// list, and an out-of-range index is rejected before any switch traffic
    /// goes out.  Success means the device's confirming notification arrived;
    /// an already-current slot returns immediately.
    ///
    /// # Errors
    ///
    /// [`HostSwitchError::InvalidSlot`] for an out-of-range index (no side
    /// effect), [`HostSwitchError::ConfirmationTimeout`] when the ack came
    /// but the confirmation never did.
    pub async fn switch_to(&self, index: u8) -> Result<(), HostSwitchError> {
        let (slot_count, current) = self.host_info().await?;
        if index >= slot_count {
            return Err(HostSwitchError::InvalidSlot { requested: index, slot_count });
        }
        if index == current {
            debug!(slot = index, "already on requested host slot");
            return Ok(());
        }

        // Subscribe before sending so the confirmation cannot slip past.
        let mut notifications = self.session.subscribe();

        self.session
            .send_request(features::CHANGE_HOST, change_host::SET_CURRENT_HOST, &[index])
            .await?;

        self.await_confirmation(&mut notifications, index).await?;
        info!(slot = index, "host switch confirmed");
        Ok(())
    }

    async fn await_confirmation(
        &self,
        notifications: &mut broadcast::Receiver<Notification>,
        expected_slot: u8,
    ) -> Result<(), HostSwitchError> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            let recv = tokio::time::timeout_at(deadline, notifications.recv()).await;
            match recv {
                Ok(Ok(Notification::HostChanged { slot })) if slot == expected_slot => {
                    return Ok(());
                }
                // Unrelated notifications keep the wait going.
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(DeviceError::DeviceUnavailable("session closed".into()).into());
                }
                Err(_) => return Err(HostSwitchError::ConfirmationTimeout(self.confirm_timeout)),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::transport::{ChannelTransport, DeviceTransport};
    use orbit_core::protocol::frame::{
        decode_report, Frame, InboundFrame, ReportKind, LONG_PARAM_LEN,
    };

    const DEVICE_INDEX: u8 = 0x01;
    const FEATURE_SET_INDEX: u8 = 0x01;
    const CHANGE_HOST_INDEX: u8 = 0x02;

    /// A fake two-slot device: slot 0 "study-desktop" (current), slot 1
    /// "laptop".  Confirms switches with a host-change notification.
    async fn run_two_slot_device(transport: ChannelTransport, confirm_switches: bool) {
        let names: [&str; 2] = ["study-desktop", "laptop"];
        let mut current: u8 = 0;

        while let Ok(bytes) = transport.recv().await {
            let request = match decode_report(&bytes) {
                Ok(InboundFrame::Response(f)) | Ok(InboundFrame::Notification(f)) => f,
                _ => continue,
            };

            let mut confirm: Option<u8> = None;
            let reply = match (request.feature_index, request.function) {
                (0x00, features::root::PING) => reply_to(&request, &[0, 0, request.params[2]]),
                (0x00, features::root::GET_FEATURE) => reply_to(&request, &[FEATURE_SET_INDEX]),
                (FEATURE_SET_INDEX, features::feature_set::GET_COUNT) => {
                    reply_to(&request, &[2])
                }
                (FEATURE_SET_INDEX, features::feature_set::GET_FEATURE_ID) => {
                    let id = match request.params[0] {
                        1 => features::FEATURE_SET,
                        _ => features::CHANGE_HOST,
                    }
                    .to_be_bytes();
                    reply_to(&request, &[id[0], id[1]])
                }
                (CHANGE_HOST_INDEX, change_host::GET_HOST_INFO) => {
                    reply_to(&request, &[2, current])
                }
                (CHANGE_HOST_INDEX, change_host::GET_HOST_NAME) => {
                    let slot = request.params[0] as usize;
                    let name = names[slot].as_bytes();
                    let mut params = vec![slot as u8, name.len() as u8];
                    params.extend_from_slice(name);
                    reply_to(&request, &params)
                }
                (CHANGE_HOST_INDEX, change_host::SET_CURRENT_HOST) => {
                    current = request.params[0];
                    if confirm_switches {
                        confirm = Some(current);
                    }
                    reply_to(&request, &[])
                }
                _ => reply_to(&request, &[]),
            };

            if transport.send(&reply).await.is_err() {
                break;
            }
            if let Some(slot) = confirm {
                let mut params = [0u8; LONG_PARAM_LEN];
                params[0] = slot;
                let notification = Frame {
                    report: ReportKind::Long,
                    device_index: DEVICE_INDEX,
                    feature_index: CHANGE_HOST_INDEX,
                    function: 0,
                    sw_id: 0,
                    params,
                }
                .encode();
                if transport.send(&notification).await.is_err() {
                    break;
                }
            }
        }
    }

    fn reply_to(request: &Frame, params: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; LONG_PARAM_LEN];
        buf[..params.len()].copy_from_slice(params);
        Frame {
            // Real firmware answers with whatever report size the payload
            // needs, even when the query itself was short.
            report: ReportKind::for_params(params.len()),
            device_index: request.device_index,
            feature_index: request.feature_index,
            function: request.function,
            sw_id: request.sw_id,
            params: buf,
        }
        .encode()
    }

    async fn controller(confirm_switches: bool) -> HostSwitchController {
        let (daemon_side, device_side) = ChannelTransport::pair();
        tokio::spawn(run_two_slot_device(device_side, confirm_switches));
        let session = DeviceSession::connect(
            std::sync::Arc::new(daemon_side),
            &DeviceConfig::default(),
            DEVICE_INDEX,
        )
        .await
        .expect("connect");
        HostSwitchController::new(std::sync::Arc::new(session))
    }

    #[tokio::test]
    async fn test_list_hosts_returns_slots_with_names_and_current_marker() {
        // Arrange
        let controller = controller(true).await;

        // Act
        let slots = controller.list_hosts().await.expect("list");

        // Assert
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].name, "study-desktop");
        assert!(slots[0].is_current);
        assert_eq!(slots[1].name, "laptop");
        assert!(!slots[1].is_current);
    }

    #[tokio::test]
    async fn test_switch_to_valid_slot_waits_for_confirmation() {
        // Arrange
        let controller = controller(true).await;

        // Act
        controller.switch_to(1).await.expect("switch");

        // Assert: the device now reports slot 1 as current
        let slots = controller.list_hosts().await.expect("list");
        assert!(slots[1].is_current);
    }

    #[tokio::test]
    async fn test_switch_to_out_of_range_slot_is_rejected_before_any_switch() {
        // Arrange
        let controller = controller(true).await;

        // Act
        let result = controller.switch_to(5).await;

        // Assert
        assert!(
            matches!(result, Err(HostSwitchError::InvalidSlot { requested: 5, slot_count: 2 })),
            "got {result:?}"
        );
        // The device was never told to move.
        let slots = controller.list_hosts().await.expect("list");
        assert!(slots[0].is_current);
    }

    #[tokio::test]
    async fn test_switch_to_current_slot_is_a_no_op() {
        let controller = controller(true).await;
        controller.switch_to(0).await.expect("no-op switch");
    }

    #[tokio::test]
    async fn test_unconfirmed_switch_times_out() {
        // Arrange: device acks the switch but never sends the notification
        let mut controller = controller(false).await;
        controller.confirm_timeout = Duration::from_millis(100);

        // Act
        let result = controller.switch_to(1).await;

        // Assert
        assert!(matches!(result, Err(HostSwitchError::ConfirmationTimeout(_))));
    }
}
