//! Well-known feature identifiers.
//!
//! A feature id is a stable 16-bit number naming a capability; the index the
//! device assigns to it is per-session and must be looked up through the
//! [`crate::protocol::table::FeatureTable`] after every (re)connect.  Only the
//! ids below are used by the daemon; everything else a device advertises is
//! recorded but ignored.

/// Protocol root: ping, per-feature index lookup.  Always at index 0.
pub const ROOT: u16 = 0x0000;
/// Feature enumeration (count + id per slot).
pub const FEATURE_SET: u16 = 0x0001;
/// Device name and type.
pub const DEVICE_NAME: u16 = 0x0005;
/// Legacy battery status reporting.
pub const BATTERY_STATUS: u16 = 0x1000;
/// Unified battery reporting (newer devices); preferred over
/// [`BATTERY_STATUS`] when both are present.
pub const UNIFIED_BATTERY: u16 = 0x1004;
/// Host-slot query and switching (Easy-Switch).
pub const CHANGE_HOST: u16 = 0x1814;
/// Diverted-button event reporting; the gesture button arrives through this.
pub const DIVERTED_BUTTONS: u16 = 0x1B04;
/// Pointer resolution query and adjustment.
pub const ADJUSTABLE_DPI: u16 = 0x2201;

/// Root feature functions.
pub mod root {
    /// `getFeature(feature_id)` – returns the per-session index of a feature.
    pub const GET_FEATURE: u8 = 0x00;
    /// `ping(data)` – echoes the data byte; validates protocol support.
    pub const PING: u8 = 0x01;
}

/// Feature-set functions.
pub mod feature_set {
    /// `getCount()` – number of features beyond the root.
    pub const GET_COUNT: u8 = 0x00;
    /// `getFeatureId(index)` – feature id at a 1-based index.
    pub const GET_FEATURE_ID: u8 = 0x01;
}

/// Change-host functions.
pub mod change_host {
    /// `getHostInfo()` – host slot count and current slot.
    pub const GET_HOST_INFO: u8 = 0x00;
    /// `getHostName(slot)` – stored name for one slot.
    pub const GET_HOST_NAME: u8 = 0x01;
    /// `setCurrentHost(slot)` – request a switch; confirmation arrives as a
    /// separate notification.
    pub const SET_CURRENT_HOST: u8 = 0x02;
}

/// Adjustable-DPI functions.
pub mod dpi {
    /// `getSensorDpi()` – current resolution.
    pub const GET_SENSOR_DPI: u8 = 0x02;
}

/// Byte used by the root ping; the device must echo it back.
pub const PING_ECHO: u8 = 0xAA;
