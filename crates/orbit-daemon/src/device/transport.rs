//! Transport seam between the session and the device-configuration tool.
//!
//! The daemon never touches the USB/BT bus itself; the system configuration
//! tool owns raw device access and re-exposes reports over a local socket.
//! The session only sees the [`DeviceTransport`] trait, so tests drive it
//! with an in-process channel pair instead of a real socket.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use orbit_core::protocol::frame::{
    LONG_REPORT_ID, LONG_REPORT_LEN, SHORT_REPORT_ID, SHORT_REPORT_LEN,
};

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("failed to open device socket {path}: {source}")]
    ConnectFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred mid-session.
    #[error("device transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The remote end closed the socket.
    #[error("device transport closed")]
    Closed,
    /// The stream carried a byte that is not a known report id; the framing
    /// is lost and the connection must be re-established.
    #[error("unknown report id 0x{0:02X} on device socket")]
    UnknownReportId(u8),
}

/// Raw report exchange with the device.
///
/// `recv` is called by exactly one pump task; `send` may be called from any
/// task holding the session.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Writes one complete report.
    async fn send(&self, report: &[u8]) -> Result<(), TransportError>;

    /// Reads the next complete report.  Blocks until one arrives or the
    /// transport closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;
}

// ── Unix socket implementation ────────────────────────────────────────────────

/// Production transport over the configuration tool's Unix socket.
///
/// Reports are framed by their leading report-id byte: 0x10 means 7 bytes
/// total, 0x11 means 20.  Anything else desynchronizes the stream and is
/// surfaced as [`TransportError::UnknownReportId`].
#[cfg(unix)]
pub struct UnixSocketTransport {
    reader: Mutex<tokio::net::unix::OwnedReadHalf>,
    writer: Mutex<tokio::net::unix::OwnedWriteHalf>,
}

#[cfg(unix)]
impl UnixSocketTransport {
    /// Connects to the configuration tool's socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] when the socket does not
    /// exist or refuses the connection.
    pub async fn connect(path: &std::path::Path) -> Result<Self, TransportError> {
        let stream = tokio::net::UnixStream::connect(path).await.map_err(|source| {
            TransportError::ConnectFailed { path: path.to_path_buf(), source }
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader: Mutex::new(reader), writer: Mutex::new(writer) })
    }
}

#[cfg(unix)]
#[async_trait]
impl DeviceTransport for UnixSocketTransport {
    async fn send(&self, report: &[u8]) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt;

        let mut writer = self.writer.lock().await;
        writer.write_all(report).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        use tokio::io::AsyncReadExt;

        let mut reader = self.reader.lock().await;

        let mut id = [0u8; 1];
        if reader.read_exact(&mut id).await.is_err() {
            return Err(TransportError::Closed);
        }

        let total_len = match id[0] {
            SHORT_REPORT_ID => SHORT_REPORT_LEN,
            LONG_REPORT_ID => LONG_REPORT_LEN,
            other => return Err(TransportError::UnknownReportId(other)),
        };

        let mut report = vec![0u8; total_len];
        report[0] = id[0];
        reader
            .read_exact(&mut report[1..])
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(report)
    }
}

// ── In-process test double ────────────────────────────────────────────────────

/// Channel-backed transport for tests: one end plays the daemon, the other
/// plays the device.
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelTransport {
    /// Returns two connected transports; what one sends the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(64);
        let (b_tx, b_rx) = mpsc::channel(64);
        (
            Self { tx: a_tx, rx: Mutex::new(b_rx) },
            Self { tx: b_tx, rx: Mutex::new(a_rx) },
        )
    }
}

#[async_trait]
impl DeviceTransport for ChannelTransport {
    async fn send(&self, report: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(report.to_vec())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        self.rx.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
