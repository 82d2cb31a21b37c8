//! Legacy passthrough transport: RSA-bootstrapped AES-CBC session wrapping a
//! JSON-RPC payload inside `securePassthrough` envelopes.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::credentials::AuthCredential;
use crate::crypto::{self, RsaKeyPair};
use crate::error::TapoError;
use crate::http::HttpTransport;
use crate::request::{SecurePassthroughParams, TapoRequest};
use crate::response::TapoResponse;

use super::{now_millis, ERROR_SESSION_EXPIRED};

const MAX_HANDSHAKE_ATTEMPTS: u32 = 3;
const RSA_KEY_BITS: usize = 1024;
/// Codes the firmware family uses for rejected credentials.
const KNOWN_AUTH_CODES: [i32; 2] = [-1501, 1111];

struct Session {
    key: [u8; 16],
    iv: [u8; 16],
    cookie: Option<String>,
    token: Option<String>,
}

/// Outcome of one encrypted exchange, before retry policy is applied.
enum Exchange {
    Reply(TapoResponse),
    /// The device expired the session (code 9999 or undecryptable body).
    Expired,
}

pub struct PassthroughProtocol {
    http: Arc<dyn HttpTransport>,
    url: String,
    credential: AuthCredential,
    terminal_uuid: String,
    request_id: i64,
    session: Option<Session>,
}

impl PassthroughProtocol {
    pub fn new(credential: AuthCredential, url: String, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            http,
            url,
            credential,
            terminal_uuid: Uuid::new_v4().to_string(),
            request_id: 0,
            session: None,
        }
    }

    /// Sends one request through the encrypted tunnel, handshaking and
    /// logging in first when no session exists. A session the device expired
    /// is rebuilt up to three times before the failure surfaces.
    pub async fn send_request(
        &mut self,
        request: &TapoRequest,
    ) -> Result<TapoResponse, TapoError> {
        let mut attempts = MAX_HANDSHAKE_ATTEMPTS;
        loop {
            if self.session.is_none() {
                self.handshake().await?;
                self.login().await?;
            }
            match self.exchange(request).await? {
                Exchange::Reply(response) => return Ok(response),
                Exchange::Expired => {
                    self.session = None;
                    if attempts == 0 {
                        return Err(TapoError::Protocol(
                            "session expired and re-handshake attempts exhausted".into(),
                        ));
                    }
                    warn!(target: "tapo::passthrough", "session expired, re-handshaking");
                    attempts -= 1;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.session = None;
    }

    /// RSA key exchange. A wrong-transport reply (code 1003) propagates as a
    /// device error so the factory can fall back to KLAP.
    async fn handshake(&mut self) -> Result<(), TapoError> {
        debug!(target: "tapo::passthrough", url = %self.url, "performing handshake");
        let keypair = RsaKeyPair::generate(RSA_KEY_BITS)?;
        let request = TapoRequest::handshake(keypair.public_key_pem()?, now_millis());
        let body = serde_json::to_vec(&request)
            .map_err(|e| TapoError::Protocol(format!("encode handshake: {e}")))?;
        let response = self.http.post(&self.url, body, None, None).await?;
        if response.status != 200 {
            return Err(TapoError::Transport(format!(
                "handshake returned HTTP {}",
                response.status
            )));
        }
        let cookie = response
            .cookie("TP_SESSIONID")
            .map(|v| format!("TP_SESSIONID={v}"));
        let result = TapoResponse::try_from_value(response.json()?)?.into_result()?;
        let key_blob = result
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| TapoError::Protocol("handshake reply missing key".into()))?;
        let material = keypair.decrypt(&crypto::b64_decode(key_blob)?)?;
        if material.len() < 32 {
            return Err(TapoError::Protocol(format!(
                "handshake key material too short: {} bytes",
                material.len()
            )));
        }
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&material[..16]);
        iv.copy_from_slice(&material[16..32]);
        self.session = Some(Session {
            key,
            iv,
            cookie,
            token: None,
        });
        Ok(())
    }

    /// `login_device` through the tunnel; retries once with the v2 parameter
    /// form before reporting rejected credentials.
    async fn login(&mut self) -> Result<(), TapoError> {
        let result = match self.exchange(&TapoRequest::login(&self.credential)).await? {
            Exchange::Reply(reply) => match reply.into_result() {
                Ok(result) => result,
                Err(err) if KNOWN_AUTH_CODES.contains(&err.error_code().unwrap_or(0)) => {
                    debug!(target: "tapo::passthrough", "login v1 rejected, retrying with v2 params");
                    match self.exchange(&TapoRequest::login_v2(&self.credential)).await? {
                        Exchange::Reply(reply) => reply
                            .into_result()
                            .map_err(|e| TapoError::Auth(e.to_string()))?,
                        Exchange::Expired => {
                            return Err(TapoError::Auth("session lost during login".into()))
                        }
                    }
                }
                Err(err) => return Err(err),
            },
            Exchange::Expired => {
                return Err(TapoError::Protocol("session expired during login".into()))
            }
        };
        let token = result
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| TapoError::Protocol("login reply missing token".into()))?;
        if let Some(session) = self.session.as_mut() {
            session.token = Some(token.to_string());
        }
        Ok(())
    }

    /// One `securePassthrough` round trip: encrypt the correlated inner
    /// request, post it, decrypt `result.response`.
    async fn exchange(&mut self, request: &TapoRequest) -> Result<Exchange, TapoError> {
        self.request_id += 1;
        let correlated = request
            .clone()
            .with_request_id(self.request_id)
            .with_terminal_uuid(&self.terminal_uuid)
            .with_request_time_millis(now_millis());
        let plaintext = serde_json::to_vec(&correlated)
            .map_err(|e| TapoError::Protocol(format!("encode request: {e}")))?;

        let session = self
            .session
            .as_ref()
            .ok_or_else(|| TapoError::Protocol("no session for passthrough exchange".into()))?;
        let ciphertext = crypto::aes_cbc_encrypt(&session.key, &session.iv, &plaintext);
        let outer = TapoRequest::secure_passthrough(SecurePassthroughParams {
            request: crypto::b64_encode(&ciphertext),
        });
        let body = serde_json::to_vec(&outer)
            .map_err(|e| TapoError::Protocol(format!("encode envelope: {e}")))?;
        let url = match &session.token {
            Some(token) => format!("{}?token={token}", self.url),
            None => self.url.clone(),
        };

        let response = self
            .http
            .post(&url, body, None, session.cookie.as_deref())
            .await?;
        if response.status != 200 {
            return Err(TapoError::Transport(format!(
                "securePassthrough returned HTTP {}",
                response.status
            )));
        }
        let envelope = TapoResponse::try_from_value(response.json()?)?;
        if envelope.error_code == ERROR_SESSION_EXPIRED {
            return Ok(Exchange::Expired);
        }
        let result = envelope.into_result()?;
        let encrypted = result
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| TapoError::Protocol("passthrough reply missing response".into()))?;
        let decrypted = match crypto::aes_cbc_decrypt(
            &session.key,
            &session.iv,
            &crypto::b64_decode(encrypted)?,
        ) {
            Ok(plaintext) => plaintext,
            // Undecryptable bodies mean the device rotated the session.
            Err(_) => return Ok(Exchange::Expired),
        };
        let inner: Value = serde_json::from_slice(&decrypted)
            .map_err(|e| TapoError::Protocol(format!("malformed inner response: {e}")))?;
        Ok(Exchange::Reply(TapoResponse::try_from_value(inner)?))
    }
}
