//! Envelope delivery between peers over a minimal HTTP/1.1-style exchange.
//!
//! Two endpoints exist: `POST /sync` carries a [`SyncEnvelope`] and is only
//! accepted from paired peers; `POST /pair` carries a pairing-code submission
//! and is how a peer becomes paired in the first place.
//!
//! Inbound validation order is fixed and size comes first: the declared
//! `Content-Length` is checked against the payload cap before a single body
//! byte is read off the socket, then the origin's pairing state, and only
//! then is the body read and parsed.  An attacker thus cannot make the
//! daemon buffer an oversized body, paired or not.
//!
//! The transport moves envelopes; what they mean is the orchestrator's
//! business.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orbit_core::flow::envelope::{PeerId, SyncEnvelope};

use crate::flow::pairing::PairingError;

/// Header naming the peer a request comes from.
const ORIGIN_HEADER: &str = "x-orbit-peer";

/// Upper bound on the request head (request line + headers).
const MAX_HEAD_BYTES: usize = 4096;

/// Error type for sync transport operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request did not declare a `Content-Length`.
    #[error("request is missing Content-Length")]
    MissingLength,

    /// The declared body size exceeds the configured cap.
    #[error("declared payload of {declared} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { declared: usize, limit: usize },

    /// The declared origin is not a paired peer.
    #[error("origin {0} is not paired")]
    UntrustedOrigin(PeerId),

    /// The request is structurally invalid.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The remote peer rejected our request.
    #[error("peer answered with status {status}")]
    PeerRejected { status: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("undecodable body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pairing-code submission body for `POST /pair`.
#[derive(Debug, Serialize, Deserialize)]
struct PairRequest {
    code: String,
}

/// What the daemon plugs into the server: trust decisions and accepted
/// payloads.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Whether `origin` may deliver sync envelopes right now.
    fn is_trusted(&self, origin: &PeerId) -> bool;

    /// A validated envelope arrived from a paired peer.
    async fn handle_envelope(&self, envelope: SyncEnvelope);

    /// `origin` submitted a pairing code.
    async fn handle_pair(&self, origin: PeerId, code: &str) -> Result<(), PairingError>;
}

/// Listening side of the transport.
pub struct SyncServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl SyncServer {
    /// Binds the listener and starts accepting connections.
    ///
    /// Every exchange runs under `request_deadline`: a peer that connects
    /// and stalls, or declares a body and withholds it, is cut off when the
    /// deadline passes instead of pinning a task and a socket.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] when the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn SyncHandler>,
        max_payload: usize,
        request_deadline: Duration,
    ) -> Result<Self, SyncError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("sync transport listening on {local_addr}");

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "sync accept error");
                        continue;
                    }
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let served =
                        tokio::time::timeout(request_deadline, serve_connection(stream, handler, max_payload));
                    match served.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!(%peer_addr, error = %e, "sync request rejected"),
                        // Dropping the serve future closes the stream.
                        Err(_) => debug!(%peer_addr, "sync request exceeded the deadline"),
                    }
                });
            }
        });

        Ok(Self { local_addr, accept_task })
    }

    /// The address the listener actually bound (relevant with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Handles one request/response exchange.
async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn SyncHandler>,
    max_payload: usize,
) -> Result<(), SyncError> {
    let head = read_head(&mut stream).await?;
    let request = match parse_head(&head) {
        Ok(request) => request,
        Err(e) => {
            respond(&mut stream, 400, "Bad Request").await?;
            return Err(e);
        }
    };

    // 1. Size gate, before any body byte leaves the socket buffer.
    let declared = match request.content_length {
        Some(len) => len,
        None => {
            respond(&mut stream, 411, "Length Required").await?;
            return Err(SyncError::MissingLength);
        }
    };
    if declared > max_payload {
        respond(&mut stream, 413, "Payload Too Large").await?;
        return Err(SyncError::PayloadTooLarge { declared, limit: max_payload });
    }

    let origin = match request.origin {
        Some(origin) => origin,
        None => {
            respond(&mut stream, 400, "Bad Request").await?;
            return Err(SyncError::BadRequest(format!("missing {ORIGIN_HEADER} header")));
        }
    };

    match request.path.as_str() {
        "/sync" => {
            // 2. Trust gate; the body is still unread.
            if !handler.is_trusted(&origin) {
                respond(&mut stream, 403, "Forbidden").await?;
                return Err(SyncError::UntrustedOrigin(origin));
            }

            // 3. Body.
            let body = read_body(&mut stream, declared).await?;
            let envelope: SyncEnvelope = match serde_json::from_slice(&body) {
                Ok(envelope) => envelope,
                Err(e) => {
                    respond(&mut stream, 400, "Bad Request").await?;
                    return Err(e.into());
                }
            };
            handler.handle_envelope(envelope).await;
            respond(&mut stream, 200, "OK").await
        }
        "/pair" => {
            let body = read_body(&mut stream, declared).await?;
            let pair: PairRequest = match serde_json::from_slice(&body) {
                Ok(pair) => pair,
                Err(e) => {
                    respond(&mut stream, 400, "Bad Request").await?;
                    return Err(e.into());
                }
            };
            match handler.handle_pair(origin, &pair.code).await {
                Ok(()) => respond(&mut stream, 200, "OK").await,
                Err(e) => {
                    debug!(%origin, error = %e, "pairing submission rejected");
                    respond(&mut stream, 403, "Forbidden").await
                }
            }
        }
        other => {
            respond(&mut stream, 404, "Not Found").await?;
            Err(SyncError::BadRequest(format!("unknown path {other}")))
        }
    }
}

struct RequestHead {
    path: String,
    content_length: Option<usize>,
    origin: Option<PeerId>,
}

/// Reads up to and including the blank line ending the head, one byte at a
/// time so nothing past it is consumed.
async fn read_head(stream: &mut TcpStream) -> Result<String, SyncError> {
    let mut head = Vec::with_capacity(256);
    loop {
        let byte = stream.read_u8().await?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(SyncError::BadRequest("request head too large".into()));
        }
    }
    String::from_utf8(head).map_err(|_| SyncError::BadRequest("head is not UTF-8".into()))
}

fn parse_head(head: &str) -> Result<RequestHead, SyncError> {
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    if method != "POST" || path.is_empty() {
        return Err(SyncError::BadRequest(format!("unsupported request line {request_line:?}")));
    }

    let mut content_length = None;
    let mut origin = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        match name.to_ascii_lowercase().as_str() {
            "content-length" => {
                content_length = Some(value.parse::<usize>().map_err(|_| {
                    SyncError::BadRequest(format!("bad Content-Length {value:?}"))
                })?);
            }
            ORIGIN_HEADER => {
                origin = Some(value.parse::<PeerId>().map_err(|_| {
                    SyncError::BadRequest(format!("bad {ORIGIN_HEADER} {value:?}"))
                })?);
            }
            _ => {}
        }
    }

    Ok(RequestHead { path: path.to_string(), content_length, origin })
}

async fn read_body(stream: &mut TcpStream, len: usize) -> Result<Vec<u8>, SyncError> {
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

async fn respond(stream: &mut TcpStream, status: u16, reason: &str) -> Result<(), SyncError> {
    let response = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Sending side of the transport.
#[derive(Debug, Clone)]
pub struct SyncClient {
    local_peer: PeerId,
}

impl SyncClient {
    pub fn new(local_peer: PeerId) -> Self {
        Self { local_peer }
    }

    /// Delivers an envelope to a peer's sync listener.
    ///
    /// # Errors
    ///
    /// [`SyncError::PeerRejected`] when the peer answers anything but 200,
    /// [`SyncError::Io`] when it cannot be reached.
    pub async fn post_sync(
        &self,
        addr: SocketAddr,
        envelope: &SyncEnvelope,
    ) -> Result<(), SyncError> {
        let body = serde_json::to_vec(envelope)?;
        self.post(addr, "/sync", &body).await
    }

    /// Submits a pairing code to a peer.
    pub async fn post_pair(&self, addr: SocketAddr, code: &str) -> Result<(), SyncError> {
        let body = serde_json::to_vec(&PairRequest { code: code.to_string() })?;
        self.post(addr, "/pair", &body).await
    }

    async fn post(&self, addr: SocketAddr, path: &str, body: &[u8]) -> Result<(), SyncError> {
        let mut stream = TcpStream::connect(addr).await?;
        let head = format!(
            "POST {path} HTTP/1.1\r\nContent-Length: {}\r\n{ORIGIN_HEADER}: {}\r\n\r\n",
            body.len(),
            self.local_peer,
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(body).await?;
        stream.flush().await?;

        let status = read_status(&mut stream).await?;
        if status != 200 {
            return Err(SyncError::PeerRejected { status });
        }
        Ok(())
    }
}

/// Reads the response status line.
async fn read_status(stream: &mut TcpStream) -> Result<u16, SyncError> {
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = stream.read_u8().await?;
        line.push(byte);
        if line.ends_with(b"\r\n") {
            break;
        }
        if line.len() > 256 {
            return Err(SyncError::BadRequest("status line too long".into()));
        }
    }
    let text = String::from_utf8_lossy(&line);
    text.split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SyncError::BadRequest(format!("bad status line {text:?}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
