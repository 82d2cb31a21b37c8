//! KLAP transport: a two-seed challenge-response handshake deriving a keyed,
//! signed AES-CBC session indexed by a per-request sequence number.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::credentials::AuthCredential;
use crate::crypto;
use crate::error::TapoError;
use crate::http::HttpTransport;
use crate::request::TapoRequest;
use crate::response::TapoResponse;

use super::{now_millis, octet_headers};

/// Per-session codec derived from the handshake seeds.
///
/// The sequence increments before each encryption, is spliced into the IV and
/// the signature, and must stay gapless within a session.
pub struct KlapCipher {
    key: [u8; 16],
    iv_prefix: [u8; 12],
    sig: [u8; 28],
    seq: i32,
}

impl KlapCipher {
    pub fn new(local_seed: &[u8; 16], remote_seed: &[u8; 16], auth_hash: &[u8]) -> Self {
        let derive = |label: &[u8]| {
            crypto::sha256(&[label, &local_seed[..], &remote_seed[..], auth_hash].concat())
        };
        let key_digest = derive(b"lsk");
        let iv_digest = derive(b"iv");
        let sig_digest = derive(b"ldk");

        let mut key = [0u8; 16];
        key.copy_from_slice(&key_digest[..16]);
        let mut iv_prefix = [0u8; 12];
        iv_prefix.copy_from_slice(&iv_digest[..12]);
        let mut sig = [0u8; 28];
        sig.copy_from_slice(&sig_digest[..28]);
        let seq = i32::from_be_bytes(iv_digest[28..32].try_into().expect("4-byte slice"));

        Self {
            key,
            iv_prefix,
            sig,
            seq,
        }
    }

    pub fn seq(&self) -> i32 {
        self.seq
    }

    fn iv_for(&self, seq: i32) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..12].copy_from_slice(&self.iv_prefix);
        iv[12..].copy_from_slice(&seq.to_be_bytes());
        iv
    }

    /// Encrypts one request body, advancing the sequence first. Returns the
    /// sequence for the URL query and the signed wire body.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> (i32, Vec<u8>) {
        self.seq = self.seq.wrapping_add(1);
        let seq_be = self.seq.to_be_bytes();
        let ciphertext = crypto::aes_cbc_encrypt(&self.key, &self.iv_for(self.seq), plaintext);
        let signature = crypto::sha256(&[&self.sig[..], &seq_be[..], &ciphertext[..]].concat());
        let mut body = Vec::with_capacity(32 + ciphertext.len());
        body.extend_from_slice(&signature);
        body.extend_from_slice(&ciphertext);
        (self.seq, body)
    }

    /// Verifies the signature, then decrypts. Any mismatch means the session
    /// is no longer valid on the device side.
    pub fn decrypt(&self, seq: i32, body: &[u8]) -> Result<Vec<u8>, TapoError> {
        if body.len() < 32 {
            return Err(TapoError::Protocol(format!(
                "KLAP body too short: {} bytes",
                body.len()
            )));
        }
        let (signature, ciphertext) = body.split_at(32);
        let expected =
            crypto::sha256(&[&self.sig[..], &seq.to_be_bytes()[..], ciphertext].concat());
        if signature != &expected[..] {
            return Err(TapoError::Protocol("KLAP signature mismatch".into()));
        }
        crypto::aes_cbc_decrypt(&self.key, &self.iv_for(seq), ciphertext)
    }
}

struct Session {
    cipher: KlapCipher,
    cookie: String,
    expires_at: Option<Instant>,
}

impl Session {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

pub struct KlapProtocol {
    http: Arc<dyn HttpTransport>,
    url: String,
    credential: AuthCredential,
    terminal_uuid: String,
    request_id: i64,
    session: Option<Session>,
}

impl KlapProtocol {
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

    /// Hash the seeds are verified against: `SHA256(SHA1(user) ‖ SHA1(pass))`.
    pub fn auth_hash(credential: &AuthCredential) -> Vec<u8> {
        let user = crypto::sha1(credential.username.as_bytes());
        let pass = crypto::sha1(credential.password.as_bytes());
        crypto::sha256(&[&user[..], &pass[..]].concat()).to_vec()
    }

    /// Sends one request over the signed session. An expired session (HTTP
    /// 403 or an undecodable reply) is re-handshaken once per call; a repeat
    /// failure surfaces as `Transport`/`Protocol`.
    pub async fn send_request(
        &mut self,
        request: &TapoRequest,
    ) -> Result<TapoResponse, TapoError> {
        let mut rehandshakes_left = 1u32;
        loop {
            if self.session.as_ref().map_or(true, Session::expired) {
                self.session = Some(self.handshake().await?);
            }

            self.request_id += 1;
            let correlated = request
                .clone()
                .with_request_id(self.request_id)
                .with_terminal_uuid(&self.terminal_uuid)
                .with_request_time_millis(now_millis());
            let plaintext = serde_json::to_vec(&correlated)
                .map_err(|e| TapoError::Protocol(format!("encode request: {e}")))?;

            let (seq, body, cookie) = {
                let session = self.session.as_mut().expect("session established above");
                let (seq, body) = session.cipher.encrypt(&plaintext);
                (seq, body, session.cookie.clone())
            };
            let url = format!("{}/request?seq={seq}", self.url);
            let response = self
                .http
                .post(&url, body, Some(&octet_headers()), Some(&cookie))
                .await?;

            if response.status == 403 {
                self.session = None;
                if rehandshakes_left == 0 {
                    return Err(TapoError::Transport(
                        "KLAP request rejected with HTTP 403 after re-handshake".into(),
                    ));
                }
                warn!(target: "tapo::klap", "session rejected (403), re-handshaking");
                rehandshakes_left -= 1;
                continue;
            }
            if response.status != 200 {
                return Err(TapoError::Transport(format!(
                    "KLAP request returned HTTP {}",
                    response.status
                )));
            }

            let session = self.session.as_ref().expect("session established above");
            match session.cipher.decrypt(seq, &response.body) {
                Ok(decrypted) => {
                    let value = serde_json::from_slice(&decrypted)
                        .map_err(|e| TapoError::Protocol(format!("malformed reply: {e}")))?;
                    return TapoResponse::try_from_value(value);
                }
                Err(err) => {
                    self.session = None;
                    if rehandshakes_left == 0 {
                        return Err(err);
                    }
                    warn!(target: "tapo::klap", error = %err, "reply unreadable, re-handshaking");
                    rehandshakes_left -= 1;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.session = None;
    }

    /// Two-stage seed exchange. `handshake1` proves the device knows the
    /// account hash; `handshake2` proves we do; both share one session cookie.
    async fn handshake(&mut self) -> Result<Session, TapoError> {
        debug!(target: "tapo::klap", url = %self.url, "performing handshake");
        let mut local_seed = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut local_seed);

        let response = self
            .http
            .post(
                &format!("{}/handshake1", self.url),
                local_seed.to_vec(),
                Some(&octet_headers()),
                None,
            )
            .await?;
        if response.status != 200 {
            return Err(TapoError::Transport(format!(
                "handshake1 returned HTTP {}",
                response.status
            )));
        }
        if response.body.len() < 48 {
            return Err(TapoError::Protocol(format!(
                "handshake1 reply too short: {} bytes",
                response.body.len()
            )));
        }
        let mut remote_seed = [0u8; 16];
        remote_seed.copy_from_slice(&response.body[..16]);
        let server_hash = &response.body[16..48];

        let mut auth_hash = Self::auth_hash(&self.credential);
        let expected =
            crypto::sha256(&[&local_seed[..], auth_hash.as_slice()].concat());
        if server_hash != &expected[..] {
            // Older firmwares seed the challenge with the bare SHA-1 of the
            // password and include both seeds.
            let legacy_material = crypto::sha1(self.credential.password.as_bytes()).to_vec();
            let legacy = crypto::sha256(
                &[&local_seed[..], &remote_seed[..], legacy_material.as_slice()].concat(),
            );
            if server_hash == &legacy[..] {
                debug!(target: "tapo::klap", "device uses legacy auth hashing");
                auth_hash = legacy_material;
            } else {
                return Err(TapoError::Auth(
                    "device seed hash does not match credentials".into(),
                ));
            }
        }

        let cookie = response
            .cookie("TP_SESSIONID")
            .map(|v| format!("TP_SESSIONID={v}"))
            .ok_or_else(|| TapoError::Protocol("handshake1 reply missing session cookie".into()))?;
        let expires_at = response
            .cookie("TIMEOUT")
            .and_then(|v| v.parse::<u64>().ok())
            .map(|seconds| Instant::now() + Duration::from_secs(seconds));

        let confirm = crypto::sha256(&[&remote_seed[..], auth_hash.as_slice()].concat());
        let response = self
            .http
            .post(
                &format!("{}/handshake2", self.url),
                confirm.to_vec(),
                Some(&octet_headers()),
                Some(&cookie),
            )
            .await?;
        if !(200..300).contains(&response.status) {
            return Err(TapoError::Transport(format!(
                "handshake2 returned HTTP {}",
                response.status
            )));
        }

        Ok(Session {
            cipher: KlapCipher::new(&local_seed, &remote_seed, &auth_hash),
            cookie,
            expires_at,
        })
    }
}
