//! Gesture recognition for the diverted menu button.
//!
//! A quick press-and-release selects the currently highlighted action; holding
//! past the threshold opens the radial menu at the pointer, and the following
//! release closes it.  The machine is pure: it owns no clock and spawns no
//! tasks.  The caller feeds it button and motion events plus an explicit
//! "hold window elapsed" tick from whatever timer it runs, and acts on the
//! intents returned.
//!
//! ```text
//!               press                 hold elapsed
//!     Idle  ───────────▶  Pressed  ───────────────▶  HoldOpen
//!       ▲                    │                          │
//!       │   release (Select) │        release (Close)   │
//!       └────────────────────┴──────────────────────────┘
//! ```

use tracing::warn;

/// Pointer coordinates in global screen space, as reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
}

/// What the UI layer should do in response to a gesture transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MenuIntent {
    /// Open the menu centered at the given pointer position.
    OpenAt(PointerPosition),
    /// Close the open menu.
    Close,
    /// Activate the action the menu currently highlights.
    Select { action_id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureState {
    Idle,
    /// Button is down, hold window still running.
    Pressed,
    /// Hold window elapsed, menu is open.
    HoldOpen,
}

/// Press/hold/release recognizer.
///
/// Exactly one intent is produced per completed gesture: a tap yields one
/// `Select`, a hold yields one `OpenAt` followed by one `Close` on release.
#[derive(Debug)]
pub struct GestureStateMachine {
    state: GestureState,
    /// Last pointer position seen; where the menu opens.
    position: PointerPosition,
    /// Action the caller reported as highlighted; selected on tap or release.
    highlighted_action: u32,
    /// Presses that arrived while not idle (missed release, event reorder).
    anomalies: u64,
}

impl GestureStateMachine {
    pub fn new() -> Self {
        Self {
            state: GestureState::Idle,
            position: PointerPosition { x: 0.0, y: 0.0 },
            highlighted_action: 0,
            anomalies: 0,
        }
    }

    /// Button went down.  Returns no intent; the caller must start its hold
    /// timer and deliver [`on_hold_elapsed`](Self::on_hold_elapsed) if the
    /// button is still down when it fires.
    pub fn on_press(&mut self, position: PointerPosition) -> Option<MenuIntent> {
        match self.state {
            GestureState::Idle => {
                self.state = GestureState::Pressed;
                self.position = position;
                None
            }
            _ => {
                // A press can only follow a release; anything else means we
                // lost an event somewhere.  Keep the current gesture intact.
                self.anomalies += 1;
                warn!(
                    anomalies = self.anomalies,
                    state = ?self.state,
                    "ignoring button press outside idle state"
                );
                None
            }
        }
    }

    /// The hold window expired while the button was down.  Stale ticks from a
    /// timer the caller failed to cancel are ignored.
    pub fn on_hold_elapsed(&mut self) -> Option<MenuIntent> {
        match self.state {
            GestureState::Pressed => {
                self.state = GestureState::HoldOpen;
                Some(MenuIntent::OpenAt(self.position))
            }
            _ => None,
        }
    }

    /// Button came back up.
    pub fn on_release(&mut self) -> Option<MenuIntent> {
        match self.state {
            GestureState::Pressed => {
                self.state = GestureState::Idle;
                Some(MenuIntent::Select { action_id: self.highlighted_action })
            }
            GestureState::HoldOpen => {
                self.state = GestureState::Idle;
                Some(MenuIntent::Close)
            }
            GestureState::Idle => None,
        }
    }

    /// Pointer moved.  While the menu is open the position is tracked so the
    /// caller can update the highlight; otherwise it only refreshes where a
    /// future menu would open.
    pub fn on_motion(&mut self, position: PointerPosition) -> Option<PointerPosition> {
        self.position = position;
        match self.state {
            GestureState::HoldOpen => Some(position),
            _ => None,
        }
    }

    /// The caller resolved pointer position to a menu action; remembered so
    /// the next `Select` names it.
    pub fn set_highlighted_action(&mut self, action_id: u32) {
        self.highlighted_action = action_id;
    }

    /// Count of presses ignored because the machine was not idle.
    pub fn anomaly_count(&self) -> u64 {
        self.anomalies
    }
}

impl Default for GestureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
