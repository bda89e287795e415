//! Local control socket for UI surfaces.
//!
//! The menu renderer and settings dashboard run out of process and drive the
//! daemon over a Unix socket, one JSON object per line each way.  This is
//! where pairing starts: the UI asks for a code here, shows it to the user,
//! and the remote peer submits it over the sync transport.  Pointer and
//! highlight updates for gesture recognition arrive the same way.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orbit_core::flow::envelope::PeerId;

/// Error type for the control socket.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to bind control socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One request from a UI surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Begin pairing with a discovered peer; the response carries the code
    /// to show the user.
    StartPairing { peer_id: PeerId },
    /// Forget a pairing.
    Unpair { peer_id: PeerId },
    /// Switch the device to a host slot.
    SwitchTo { index: u8 },
    /// The user activated a menu action.
    Select { action_id: u32 },
    /// Current pointer position, for menu placement.
    Pointer { x: f64, y: f64 },
    /// Menu action currently under the pointer.
    Highlight { action_id: u32 },
    /// Known peers and their pairing state.
    ListPeers,
}

/// One response line back to the UI surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok,
    PairingCode { code: String },
    Peers { peers: Vec<PeerSummary> },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub name: String,
    pub paired: bool,
}

/// What the daemon plugs into the server.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    async fn handle(&self, request: ControlRequest) -> ControlResponse;
}

/// Listening side of the control socket.
#[cfg(unix)]
pub struct ControlServer {
    accept_task: JoinHandle<()>,
}

#[cfg(unix)]
impl ControlServer {
    /// Binds the socket and starts serving UI connections.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::BindFailed`] when the socket path cannot be
    /// bound.
    pub async fn bind(path: &Path, handler: Arc<dyn ControlHandler>) -> Result<Self, ControlError> {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        // A socket file left behind by a previous run would block the bind.
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let listener = tokio::net::UnixListener::bind(path)
            .map_err(|source| ControlError::BindFailed { path: path.to_path_buf(), source })?;
        info!("control socket listening at {}", path.display());

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "control accept error");
                        continue;
                    }
                };
                tokio::spawn(serve_ui(stream, Arc::clone(&handler)));
            }
        });

        Ok(Self { accept_task })
    }
}

#[cfg(unix)]
impl Drop for ControlServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Handles one UI connection for as long as it stays open.
#[cfg(unix)]
async fn serve_ui(stream: tokio::net::UnixStream, handler: Arc<dyn ControlHandler>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => {
                debug!(?request, "control request");
                handler.handle(request).await
            }
            Err(e) => ControlResponse::Error { message: format!("bad request: {e}") },
        };
        let mut payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "control response serialization failed");
                break;
            }
        };
        payload.push(b'\n');
        if writer.write_all(&payload).await.is_err() {
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::net::UnixStream;
    use uuid::Uuid;

    /// Answers with fixed responses so the wire format is the thing under
    /// test.
    struct ScriptedHandler;

    #[async_trait]
    impl ControlHandler for ScriptedHandler {
        async fn handle(&self, request: ControlRequest) -> ControlResponse {
            match request {
                ControlRequest::StartPairing { .. } => {
                    ControlResponse::PairingCode { code: "123456".to_string() }
                }
                ControlRequest::ListPeers => ControlResponse::Peers { peers: Vec::new() },
                _ => ControlResponse::Ok,
            }
        }
    }

    fn socket_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("orbit_ctl_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn roundtrip(
        writer: &mut tokio::net::unix::OwnedWriteHalf,
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        line: &str,
    ) -> ControlResponse {
        writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        let reply = lines.next_line().await.unwrap().expect("response line");
        serde_json::from_str(&reply).expect("decodable response")
    }

    #[tokio::test]
    async fn test_requests_and_responses_travel_as_json_lines() {
        // Arrange
        let dir = socket_dir();
        let path = dir.join("control.sock");
        let server = ControlServer::bind(&path, Arc::new(ScriptedHandler)).await.expect("bind");
        let stream = UnixStream::connect(&path).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Act
        let request =
            serde_json::to_string(&ControlRequest::StartPairing { peer_id: Uuid::new_v4() })
                .unwrap();
        let response = roundtrip(&mut writer, &mut lines, &request).await;

        // Assert
        assert_eq!(response, ControlResponse::PairingCode { code: "123456".to_string() });

        drop(server);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_undecodable_line_gets_an_error_and_the_connection_survives() {
        // Arrange
        let dir = socket_dir();
        let path = dir.join("control.sock");
        let server = ControlServer::bind(&path, Arc::new(ScriptedHandler)).await.expect("bind");
        let stream = UnixStream::connect(&path).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Act: garbage first, then a valid command on the same connection
        let garbage = roundtrip(&mut writer, &mut lines, "{not json").await;
        let select =
            serde_json::to_string(&ControlRequest::Select { action_id: 3 }).unwrap();
        let valid = roundtrip(&mut writer, &mut lines, &select).await;

        // Assert
        assert!(matches!(garbage, ControlResponse::Error { .. }));
        assert_eq!(valid, ControlResponse::Ok);

        drop(server);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced_on_bind() {
        // A previous run's socket file must not keep the daemon from coming
        // up.
        let dir = socket_dir();
        let path = dir.join("control.sock");
        std::fs::write(&path, b"stale").unwrap();

        let server = ControlServer::bind(&path, Arc::new(ScriptedHandler)).await;
        assert!(server.is_ok());

        drop(server);
        std::fs::remove_dir_all(&dir).ok();
    }
}
