//! The three device transports behind one operation set.
//!
//! A device speaks exactly one of these; the factory probes and picks. Every
//! variant owns its session material and re-establishes it transparently when
//! the device expires it, so callers only ever see final outcomes.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TapoError;
use crate::request::TapoRequest;
use crate::response::TapoResponse;

pub mod h200;
pub mod klap;
pub mod passthrough;

pub use h200::H200Protocol;
pub use klap::{KlapCipher, KlapProtocol};
pub use passthrough::PassthroughProtocol;

/// Error code a passthrough-only endpoint returns when the device actually
/// speaks KLAP; the factory switches transports on it.
pub const ERROR_WRONG_TRANSPORT: i32 = 1003;
/// Passthrough session-expired code; triggers a re-handshake.
pub const ERROR_SESSION_EXPIRED: i32 = 9999;
/// H200 invalid-stok code; triggers a token refresh.
pub const ERROR_INVALID_STOK: i32 = -40401;
/// H200 handshake-retry code.
pub const ERROR_RETRY_HANDSHAKE: i32 = -40413;
/// H200 login-suspension code.
pub const ERROR_SUSPENDED: i32 = -40404;

/// Tagged transport variant; one per device session.
pub enum TapoProtocol {
    Passthrough(PassthroughProtocol),
    Klap(KlapProtocol),
    H200(H200Protocol),
}

impl TapoProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            TapoProtocol::Passthrough(_) => "passthrough",
            TapoProtocol::Klap(_) => "klap",
            TapoProtocol::H200(_) => "h200",
        }
    }

    /// Sends one request, running whatever handshakes the session needs.
    pub async fn send_request(
        &mut self,
        request: &TapoRequest,
    ) -> Result<TapoResponse, TapoError> {
        match self {
            TapoProtocol::Passthrough(protocol) => protocol.send_request(request).await,
            TapoProtocol::Klap(protocol) => protocol.send_request(request).await,
            TapoProtocol::H200(protocol) => protocol.send_request(request).await,
        }
    }

    /// Discards session material; the next request starts from a handshake.
    pub fn close(&mut self) {
        match self {
            TapoProtocol::Passthrough(protocol) => protocol.close(),
            TapoProtocol::Klap(protocol) => protocol.close(),
            TapoProtocol::H200(protocol) => protocol.close(),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub(crate) fn octet_headers() -> Vec<(String, String)> {
    vec![(
        "Content-Type".into(),
        "application/octet-stream".into(),
    )]
}
