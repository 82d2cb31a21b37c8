use thiserror::Error;

/// Errors surfaced by the protocol and device layers.
///
/// Session-expiry recovery (re-handshake, stok refresh) happens inside the
/// protocols; everything that reaches the caller is final for that request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TapoError {
    /// Socket, DNS, TLS or non-200 HTTP failures.
    #[error("transport error: {0}")]
    Transport(String),
    /// Malformed envelopes, decryption or padding failures, signature
    /// mismatches, unexpected handshake replies.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The device rejected the configured credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Nonzero `error_code` with no protocol-level meaning.
    #[error("device error {code}: {msg}")]
    Device { code: i32, msg: String },
    /// The device asked us to back off before logging in again.
    #[error("temporary suspension, retry in {seconds} seconds")]
    Suspension { seconds: u64 },
    /// An accessor was used before the first successful `update()`.
    #[error("update() must complete before accessing device data")]
    NeedsUpdate,
    /// The feature is gated behind a component the device did not declare.
    #[error("device does not support {0}")]
    Unsupported(&'static str),
}

impl TapoError {
    pub(crate) fn device(code: i32, msg: Option<String>) -> Self {
        TapoError::Device {
            code,
            msg: msg.unwrap_or_default(),
        }
    }

    /// Error code carried by a `Device` variant, if any.
    pub fn error_code(&self) -> Option<i32> {
        match self {
            TapoError::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}
