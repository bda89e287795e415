//! Drives the gesture state machine from device notifications.
//!
//! The state machine itself is pure; this task supplies what it cannot own:
//! the hold timer, the diverted-button stream from the device session, and
//! pointer/highlight updates from the UI layer.  Recognized intents go out on
//! the daemon event bus for the menu renderer to act on.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use orbit_core::gesture::{GestureStateMachine, PointerPosition};

use crate::device::session::Notification;
use crate::events::{DaemonEvent, EventBus};

/// Bit of the diverted-button mask bound to the menu gesture.
const GESTURE_BUTTON: u16 = 0x0001;

/// Updates the UI layer feeds into gesture recognition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverInput {
    /// Current pointer position in global screen space.
    Pointer(PointerPosition),
    /// Menu action currently under the pointer.
    Highlight(u32),
}

/// Spawns the gesture driver task.
///
/// Runs until either input channel closes.
pub fn spawn_gesture_driver(
    notifications: broadcast::Receiver<Notification>,
    inputs: mpsc::Receiver<DriverInput>,
    bus: EventBus,
    hold_threshold: Duration,
) -> JoinHandle<()> {
    tokio::spawn(drive(notifications, inputs, bus, hold_threshold))
}

async fn drive(
    mut notifications: broadcast::Receiver<Notification>,
    mut inputs: mpsc::Receiver<DriverInput>,
    bus: EventBus,
    hold_threshold: Duration,
) {
    let mut fsm = GestureStateMachine::new();
    let mut pointer = PointerPosition { x: 0.0, y: 0.0 };
    let mut button_down = false;
    let mut hold_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            // Hold window expiry; armed only while the button is down.
            _ = async {
                match hold_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                hold_deadline = None;
                if let Some(intent) = fsm.on_hold_elapsed() {
                    debug!(?intent, "hold threshold reached");
                    bus.publish(DaemonEvent::Menu(intent));
                }
            }

            notification = notifications.recv() => {
                let buttons = match notification {
                    Ok(Notification::ButtonDiverted { buttons }) => buttons,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Lost transitions leave the press state unknowable;
                        // drop any gesture in progress.
                        debug!(skipped, "gesture driver lagged; resetting press state");
                        hold_deadline = None;
                        if let Some(intent) = fsm.on_release() {
                            bus.publish(DaemonEvent::Menu(intent));
                        }
                        button_down = false;
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let pressed = buttons & GESTURE_BUTTON != 0;
                if pressed && !button_down {
                    button_down = true;
                    fsm.on_press(pointer);
                    hold_deadline = Some(tokio::time::Instant::now() + hold_threshold);
                } else if !pressed && button_down {
                    button_down = false;
                    hold_deadline = None;
                    if let Some(intent) = fsm.on_release() {
                        debug!(?intent, "gesture completed");
                        bus.publish(DaemonEvent::Menu(intent));
                    }
                }
            }

            input = inputs.recv() => {
                match input {
                    Some(DriverInput::Pointer(position)) => {
                        pointer = position;
                        if let Some(tracked) = fsm.on_motion(position) {
                            trace!(x = tracked.x, y = tracked.y, "tracking highlight motion");
                        }
                    }
                    Some(DriverInput::Highlight(action_id)) => {
                        fsm.set_highlighted_action(action_id);
                    }
                    None => break,
                }
            }
        }
    }
    debug!("gesture driver stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
