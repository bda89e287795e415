//! Device-facing side of the daemon: transport seam, request/response
//! session, and host switching.

pub mod host_switch;
pub mod session;
pub mod transport;

pub use host_switch::{HostSwitchController, HostSwitchError};
pub use session::{DeviceError, DeviceSession, DeviceSnapshot, Notification};
pub use transport::{DeviceTransport, TransportError};
