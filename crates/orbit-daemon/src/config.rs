//! TOML-based configuration for the daemon.
//!
//! Reads and writes `AppConfig` at the platform-appropriate location:
//! - Linux:    `~/.config/orbit/config.toml`
//! - macOS:    `~/Library/Application Support/Orbit/config.toml`
//! - Windows:  `%APPDATA%\Orbit\config.toml`
//!
//! Every field carries a serde default so the daemon works on first run and
//! after upgrades that introduce new fields.  Timing and size limits live
//! here rather than as code constants so they can be tuned per machine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub flow: FlowConfig,
}

/// General daemon behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Instance name shown to peers during discovery and pairing.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// Path of the local socket the UI surfaces send commands over.
    #[serde(default = "default_control_socket")]
    pub control_socket_path: PathBuf,
}

/// Device protocol tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Path of the local socket the device-configuration tool exposes.
    #[serde(default = "default_device_socket")]
    pub socket_path: PathBuf,
    /// How long a request may wait for its response before timing out.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Extra attempts for feature discovery before the device is declared
    /// unavailable.
    #[serde(default = "default_discovery_retries")]
    pub discovery_retries: u32,
    /// Hold duration that turns a button press into a menu-open gesture.
    #[serde(default = "default_hold_threshold_ms")]
    pub hold_threshold_ms: u64,
}

/// Flow (LAN sync) networking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowConfig {
    /// Stable identity of this instance; generated on first run.
    #[serde(default = "default_peer_id")]
    pub peer_id: Uuid,
    /// UDP port for peer discovery broadcasts.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP port the sync transport listens on.
    #[serde(default = "default_sync_port")]
    pub sync_port: u16,
    /// IP address to bind sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Seconds between discovery announcements.
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
    /// A peer unseen for this long is dropped from the directory.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    /// Pairing codes expire after this many seconds.
    #[serde(default = "default_pairing_code_ttl_secs")]
    pub pairing_code_ttl_secs: u64,
    /// Largest sync payload accepted, in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// A sync request that has not completed within this many seconds is
    /// disconnected.
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn hold_threshold(&self) -> Duration {
        Duration::from_millis(self.hold_threshold_ms)
    }
}

impl FlowConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn pairing_code_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing_code_ttl_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "orbit".to_string())
}
fn default_device_socket() -> PathBuf {
    PathBuf::from("/run/orbit/device.sock")
}
fn default_control_socket() -> PathBuf {
    PathBuf::from("/run/orbit/control.sock")
}
fn default_request_timeout_ms() -> u64 {
    2_000
}
fn default_discovery_retries() -> u32 {
    2
}
fn default_hold_threshold_ms() -> u64 {
    350
}
fn default_peer_id() -> Uuid {
    Uuid::new_v4()
}
fn default_discovery_port() -> u16 {
    46900
}
fn default_sync_port() -> u16 {
    46901
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_announce_interval_secs() -> u64 {
    2
}
fn default_liveness_timeout_secs() -> u64 {
    10
}
fn default_pairing_code_ttl_secs() -> u64 {
    60
}
fn default_max_payload_bytes() -> usize {
    1_048_576
}
fn default_request_deadline_secs() -> u64 {
    10
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            instance_name: default_instance_name(),
            control_socket_path: default_control_socket(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_device_socket(),
            request_timeout_ms: default_request_timeout_ms(),
            discovery_retries: default_discovery_retries(),
            hold_threshold_ms: default_hold_threshold_ms(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            peer_id: default_peer_id(),
            discovery_port: default_discovery_port(),
            sync_port: default_sync_port(),
            bind_address: default_bind_address(),
            announce_interval_secs: default_announce_interval_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            pairing_code_ttl_secs: default_pairing_code_ttl_secs(),
            max_payload_bytes: default_max_payload_bytes(),
            request_deadline_secs: default_request_deadline_secs(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from disk, returning `AppConfig::default()` if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the config directory if needed.
///
/// Called on first run so the generated `peer_id` survives restarts.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Orbit"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("orbit"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("Orbit"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
