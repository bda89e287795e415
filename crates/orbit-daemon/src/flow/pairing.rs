//! One-time pairing codes for Flow peers.
//!
//! Pairing is user-mediated: this instance shows a 6-digit code, the user
//! types it on the other machine, and the other machine submits it over the
//! sync transport.  Codes come from the OS CSPRNG, are bound to a single
//! peer, expire, and die on first use either way.  A few wrong guesses
//! consume the code early so it cannot be brute forced within its lifetime.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use orbit_core::flow::envelope::PeerId;

/// Wrong guesses allowed before the code is consumed.
const MAX_CODE_ATTEMPTS: u8 = 3;

/// Error type for pairing operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    /// No code was issued for this peer, or it was already consumed.
    #[error("no active pairing code for this peer")]
    NoActiveCode,

    /// The submitted code does not match.
    #[error("wrong pairing code; {attempts_remaining} attempt(s) remaining")]
    WrongCode { attempts_remaining: u8 },

    /// The code outlived its TTL.
    #[error("pairing code expired")]
    Expired,

    /// The peer is already paired; issuing another code is a no-op.
    #[error("peer is already paired")]
    AlreadyPaired,
}

struct IssuedCode {
    code: String,
    issued_at: Instant,
    wrong_attempts: u8,
}

/// Issues and verifies pairing codes.
pub struct PairingAuthority {
    codes: HashMap<PeerId, IssuedCode>,
    paired: HashSet<PeerId>,
    code_ttl: Duration,
}

impl PairingAuthority {
    pub fn new(code_ttl: Duration) -> Self {
        Self { codes: HashMap::new(), paired: HashSet::new(), code_ttl }
    }

    /// Issues a fresh code for `peer_id`, replacing any outstanding one.
    ///
    /// # Errors
    ///
    /// Returns [`PairingError::AlreadyPaired`] for a peer that is already
    /// paired.
    pub fn issue_code(&mut self, peer_id: PeerId) -> Result<String, PairingError> {
        if self.paired.contains(&peer_id) {
            return Err(PairingError::AlreadyPaired);
        }

        let code = generate_code();
        self.codes.insert(
            peer_id,
            IssuedCode { code: code.clone(), issued_at: Instant::now(), wrong_attempts: 0 },
        );
        info!(%peer_id, "pairing code issued");
        Ok(code)
    }

    /// Verifies a submitted code and pairs the peer on match.
    ///
    /// Every rejection invalidates the handshake: an expired or exhausted
    /// code is removed, so the peer must start over with a new one.
    ///
    /// # Errors
    ///
    /// [`PairingError::NoActiveCode`] with no outstanding code (including
    /// after a successful pairing — codes are single-use),
    /// [`PairingError::Expired`] past the TTL, [`PairingError::WrongCode`]
    /// on mismatch.
    pub fn verify(&mut self, peer_id: PeerId, submitted: &str) -> Result<(), PairingError> {
        let issued = self.codes.get_mut(&peer_id).ok_or(PairingError::NoActiveCode)?;

        if issued.issued_at.elapsed() > self.code_ttl {
            self.codes.remove(&peer_id);
            warn!(%peer_id, "pairing code expired");
            return Err(PairingError::Expired);
        }

        if issued.code != submitted {
            issued.wrong_attempts += 1;
            let remaining = MAX_CODE_ATTEMPTS.saturating_sub(issued.wrong_attempts);
            if remaining == 0 {
                self.codes.remove(&peer_id);
                warn!(%peer_id, "pairing code consumed by repeated wrong guesses");
            }
            return Err(PairingError::WrongCode { attempts_remaining: remaining });
        }

        self.codes.remove(&peer_id);
        self.paired.insert(peer_id);
        info!(%peer_id, "peer paired");
        Ok(())
    }

    pub fn is_paired(&self, peer_id: &PeerId) -> bool {
        self.paired.contains(peer_id)
    }

    /// Forgets a pairing, e.g. when the user removes the peer.
    pub fn unpair(&mut self, peer_id: &PeerId) -> bool {
        self.codes.remove(peer_id);
        self.paired.remove(peer_id)
    }
}

/// Generates a 6-digit numeric code from the OS CSPRNG.
fn generate_code() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{n:06}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
