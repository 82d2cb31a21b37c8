//! Hub-camera (H200) transport: digest login producing a `stok` URL token,
//! with an optional encrypted layer negotiated by probing the firmware.

use std::sync::Arc;

use rand::RngCore;
use serde_json::Value;
use tracing::{debug, warn};

use crate::credentials::AuthCredential;
use crate::crypto;
use crate::error::TapoError;
use crate::http::HttpTransport;
use crate::request::{SecurePassthroughParams, TapoRequest};
use crate::response::TapoResponse;

use super::{ERROR_INVALID_STOK, ERROR_RETRY_HANDSHAKE, ERROR_SUSPENDED};

const MAX_SESSION_RETRIES: u32 = 3;
/// Code carried inside `result.data.code` on rejected credentials.
const ERROR_BAD_CREDENTIALS: i64 = -40411;

/// Which digest of the account password the firmware expects; detected from
/// the `device_confirm` value during the secure login exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordHashAlgo {
    Md5,
    Sha256,
}

struct Session {
    stok: String,
    cnonce: String,
    /// Present only on the secure variant.
    seq: Option<i64>,
    lsk: Option<[u8; 16]>,
    ivb: Option<[u8; 16]>,
}

enum Exchange {
    Reply(TapoResponse),
    /// The device no longer accepts the stok (or the encrypted layer broke);
    /// refresh and retry.
    InvalidSession(i32),
}

pub struct H200Protocol {
    http: Arc<dyn HttpTransport>,
    url: String,
    host: String,
    md5_password: String,
    sha256_password: String,
    algo: Option<PasswordHashAlgo>,
    secure: Option<bool>,
    session: Option<Session>,
}

impl H200Protocol {
    /// Only the password half of the credential participates in this
    /// protocol; the account is always `admin`.
    pub fn new(credential: AuthCredential, host: String, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            http,
            url: format!("https://{host}"),
            host,
            md5_password: crypto::md5_hex_upper(&credential.password),
            sha256_password: crypto::sha256_hex_upper(&credential.password),
            algo: None,
            secure: None,
            session: None,
        }
    }

    pub async fn send_request(
        &mut self,
        request: &TapoRequest,
    ) -> Result<TapoResponse, TapoError> {
        let mut retries = MAX_SESSION_RETRIES;
        loop {
            if self.session.is_none() {
                self.refresh_stok().await?;
            }
            match self.exchange(request).await? {
                Exchange::Reply(response) => return Ok(response),
                Exchange::InvalidSession(code) => {
                    self.session = None;
                    if retries == 0 {
                        return Err(TapoError::device(
                            code,
                            Some("session retries exhausted".into()),
                        ));
                    }
                    warn!(target: "tapo::h200", code, "stok rejected, refreshing session");
                    retries -= 1;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.session = None;
    }

    fn headers(&self, seq_and_tag: Option<(i64, String)>) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Host".into(), format!("{}:443", self.host)),
            ("Referer".into(), format!("{}:443", self.url)),
            ("Accept".into(), "application/json".into()),
            ("Accept-Encoding".into(), "gzip, deflate".into()),
            ("User-Agent".into(), "Tapo CameraClient Android".into()),
            ("requestByApp".into(), "true".into()),
            (
                "Content-Type".into(),
                "application/json; charset=UTF-8".into(),
            ),
        ];
        if let Some((seq, tag)) = seq_and_tag {
            headers.push(("Seq".into(), seq.to_string()));
            headers.push(("Tapo_tag".into(), tag));
        }
        headers
    }

    fn hashed_password(&self) -> Result<&str, TapoError> {
        match self.algo {
            Some(PasswordHashAlgo::Md5) => Ok(&self.md5_password),
            Some(PasswordHashAlgo::Sha256) => Ok(&self.sha256_password),
            None => Err(TapoError::Protocol(
                "password hash algorithm not established".into(),
            )),
        }
    }

    /// Probes whether the firmware negotiates the encrypted layer: an empty
    /// login must answer `-40413` with `encrypt_type` containing `"3"`.
    async fn is_secure(&mut self) -> Result<bool, TapoError> {
        if let Some(secure) = self.secure {
            return Ok(secure);
        }
        debug!(target: "tapo::h200", "probing for secure connection support");
        let probe = TapoRequest::h200_login(None, None, None, None);
        let body = encode(&probe)?;
        let response = self
            .http
            .post(&self.url, body, Some(&self.headers(None)), None)
            .await?;
        let value = response.json()?;
        let secure = value.get("error_code").and_then(Value::as_i64)
            == Some(ERROR_RETRY_HANDSHAKE as i64)
            && encrypt_types(&value).iter().any(|t| t.contains('3'));
        self.secure = Some(secure);
        Ok(secure)
    }

    /// Runs the login flow (legacy or secure) until a fresh `stok` is held.
    async fn refresh_stok(&mut self) -> Result<(), TapoError> {
        let mut retries = MAX_SESSION_RETRIES;
        loop {
            match self.login_once().await {
                Ok(()) => return Ok(()),
                Err(TapoError::Device { code, .. }) if code == ERROR_RETRY_HANDSHAKE => {
                    if retries == 0 {
                        return Err(TapoError::Auth("device kept rejecting the login".into()));
                    }
                    debug!(target: "tapo::h200", "login asked for a handshake retry");
                    retries -= 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn login_once(&mut self) -> Result<(), TapoError> {
        let mut cnonce_bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut cnonce_bytes);
        let cnonce = hex::encode_upper(cnonce_bytes);

        let secure = self.is_secure().await?;
        let login = if secure {
            TapoRequest::h200_login(Some(&cnonce), None, None, None)
        } else {
            TapoRequest::h200_login(None, Some(self.md5_password.as_str()), Some(true), None)
        };
        let response = self
            .http
            .post(&self.url, encode(&login)?, Some(&self.headers(None)), None)
            .await?;
        if response.status == 401 {
            if let Ok(value) = response.json() {
                if lookup(&value, &["result", "data", "code"]).and_then(Value::as_i64)
                    == Some(ERROR_BAD_CREDENTIALS)
                {
                    return Err(TapoError::Auth("device rejected the password".into()));
                }
            }
        }
        let mut value = self.checked_json(&response, secure)?;

        let mut session = Session {
            stok: String::new(),
            cnonce: cnonce.clone(),
            seq: None,
            lsk: None,
            ivb: None,
        };

        if secure {
            let nonce = lookup(&value, &["result", "data", "nonce"])
                .and_then(Value::as_str)
                .map(str::to_string);
            let confirm = lookup(&value, &["result", "data", "device_confirm"])
                .and_then(Value::as_str)
                .map(str::to_string);
            let (nonce, confirm) = match (nonce, confirm) {
                (Some(nonce), Some(confirm)) => (nonce, confirm),
                _ => {
                    check_suspension(&value)?;
                    return Err(error_for(&value));
                }
            };
            if !self.select_algo(&cnonce, &nonce, &confirm) {
                check_suspension(&value)?;
                return Err(error_for(&value));
            }

            // Password verified locally; exchange the digest for a stok.
            let pw_hash = self.hashed_password()?.to_string();
            let digest_passwd = format!(
                "{}{cnonce}{nonce}",
                crypto::sha256_hex_upper(&format!("{pw_hash}{cnonce}{nonce}"))
            );
            let login = TapoRequest::h200_login(Some(&cnonce), None, None, Some(&digest_passwd));
            let response = self
                .http
                .post(&self.url, encode(&login)?, Some(&self.headers(None)), None)
                .await?;
            value = self.checked_json(&response, secure)?;

            if let Some(start_seq) = lookup(&value, &["result", "start_seq"]).and_then(Value::as_i64)
            {
                // Encrypted control is only granted to the owner account.
                if lookup(&value, &["result", "user_group"]).and_then(Value::as_str)
                    != Some("root")
                {
                    return Err(TapoError::Auth(
                        "account is not the device owner".into(),
                    ));
                }
                session.seq = Some(start_seq);
                session.lsk = Some(self.encryption_token("lsk", &cnonce, &nonce)?);
                session.ivb = Some(self.encryption_token("ivb", &cnonce, &nonce)?);
                debug!(target: "tapo::h200", start_seq, "encrypted layer established");
            }
        } else {
            self.algo = Some(PasswordHashAlgo::Md5);
        }

        check_suspension(&value)?;

        match lookup(&value, &["result", "stok"]).and_then(Value::as_str) {
            Some(stok) => {
                session.stok = stok.to_string();
                self.session = Some(session);
                Ok(())
            }
            None => Err(error_for(&value)),
        }
    }

    /// Matches `device_confirm` against both digest algorithms and remembers
    /// the one the firmware used.
    fn select_algo(&mut self, cnonce: &str, nonce: &str, device_confirm: &str) -> bool {
        self.algo = None;
        let with_sha256 = crypto::sha256_hex_upper(&format!(
            "{cnonce}{}{nonce}",
            self.sha256_password
        ));
        let with_md5 =
            crypto::sha256_hex_upper(&format!("{cnonce}{}{nonce}", self.md5_password));
        if device_confirm == format!("{with_sha256}{nonce}{cnonce}") {
            self.algo = Some(PasswordHashAlgo::Sha256);
        } else if device_confirm == format!("{with_md5}{nonce}{cnonce}") {
            self.algo = Some(PasswordHashAlgo::Md5);
        }
        self.algo.is_some()
    }

    /// `SHA256(type ‖ cnonce ‖ nonce ‖ hashed_key)[0..16]` session material.
    fn encryption_token(
        &self,
        token_type: &str,
        cnonce: &str,
        nonce: &str,
    ) -> Result<[u8; 16], TapoError> {
        let pw_hash = self.hashed_password()?;
        let hashed_key = crypto::sha256_hex_upper(&format!("{cnonce}{pw_hash}{nonce}"));
        let digest = crypto::sha256(format!("{token_type}{cnonce}{nonce}{hashed_key}").as_bytes());
        let mut token = [0u8; 16];
        token.copy_from_slice(&digest[..16]);
        Ok(token)
    }

    fn tag_for(&self, wrapped: &TapoRequest, seq: i64) -> Result<String, TapoError> {
        let pw_hash = self.hashed_password()?;
        let prefix = crypto::sha256_hex_upper(&format!(
            "{pw_hash}{}",
            self.session.as_ref().map(|s| s.cnonce.as_str()).unwrap_or("")
        ));
        let body = serde_json::to_string(wrapped)
            .map_err(|e| TapoError::Protocol(format!("encode request: {e}")))?;
        Ok(crypto::sha256_hex_upper(&format!("{prefix}{body}{seq}")))
    }

    async fn exchange(&mut self, request: &TapoRequest) -> Result<Exchange, TapoError> {
        let secure = self.is_secure().await?;
        let (stok, seq, lsk, ivb) = {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| TapoError::Protocol("no stok for request".into()))?;
            (session.stok.clone(), session.seq, session.lsk, session.ivb)
        };
        let operational_url = format!("{}/stok={stok}/ds", self.url);

        let (body, headers, keys) = if let (true, Some(seq)) = (secure, seq) {
            let lsk = lsk.ok_or_else(|| {
                TapoError::Protocol("secure session missing key material".into())
            })?;
            let ivb = ivb.ok_or_else(|| {
                TapoError::Protocol("secure session missing iv material".into())
            })?;
            let plaintext = encode(request)?;
            let wrapped = TapoRequest::secure_passthrough(SecurePassthroughParams {
                request: crypto::b64_encode(&crypto::aes_cbc_encrypt(&lsk, &ivb, &plaintext)),
            });
            let tag = match self.tag_for(&wrapped, seq) {
                Ok(tag) => tag,
                // Losing track of the hash algorithm means the session state
                // is stale; rebuild it.
                Err(_) => return Ok(Exchange::InvalidSession(ERROR_INVALID_STOK)),
            };
            let headers = self.headers(Some((seq, tag)));
            if let Some(session) = self.session.as_mut() {
                session.seq = Some(seq + 1);
            }
            (encode(&wrapped)?, headers, Some((lsk, ivb)))
        } else {
            (encode(request)?, self.headers(None), None)
        };

        let response = self
            .http
            .post(&operational_url, body, Some(&headers), None)
            .await?;
        // A 500 on the encrypted layer is the firmware's way of reporting an
        // expired session; everything else non-200 is fatal.
        if response.status != 200 {
            if secure && response.status == 500 {
                return Ok(Exchange::InvalidSession(ERROR_INVALID_STOK));
            }
            return Err(TapoError::Transport(format!(
                "device returned HTTP {}",
                response.status
            )));
        }

        let outer = response.json()?;
        let inner_payload = lookup(&outer, &["result", "response"])
            .and_then(Value::as_str)
            .map(str::to_string);
        let value = match (keys, inner_payload) {
            (Some((lsk, ivb)), Some(inner)) => {
                match crypto::aes_cbc_decrypt(&lsk, &ivb, &crypto::b64_decode(&inner)?) {
                    Ok(plaintext) => serde_json::from_slice(&plaintext).map_err(|e| {
                        TapoError::Protocol(format!("malformed inner response: {e}"))
                    })?,
                    Err(_) => return Ok(Exchange::InvalidSession(ERROR_INVALID_STOK)),
                }
            }
            _ => outer,
        };

        let code = value
            .get("error_code")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32;
        if code == ERROR_INVALID_STOK || code == -1 {
            return Ok(Exchange::InvalidSession(code));
        }
        if code == ERROR_SUSPENDED {
            check_suspension(&value)?;
        }

        let mut envelope = TapoResponse::try_from_value(value)?;
        // getDeviceInfo nests the payload; flatten for parity with the other
        // transports.
        if let Some(info) = envelope
            .result
            .as_ref()
            .and_then(|r| lookup(r, &["device_info", "info"]))
        {
            envelope.result = Some(info.clone());
        }
        Ok(Exchange::Reply(envelope))
    }

    fn checked_json(
        &self,
        response: &crate::http::HttpResponse,
        secure: bool,
    ) -> Result<Value, TapoError> {
        if response.status != 200 && !(secure && response.status == 500) {
            return Err(TapoError::Transport(format!(
                "device returned HTTP {}",
                response.status
            )));
        }
        response.json()
    }
}

fn encode(request: &TapoRequest) -> Result<Vec<u8>, TapoError> {
    serde_json::to_vec(request).map_err(|e| TapoError::Protocol(format!("encode request: {e}")))
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn encrypt_types(value: &Value) -> Vec<String> {
    match lookup(value, &["result", "data", "encrypt_type"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Surfaces the lock-out both reply shapes can carry.
fn check_suspension(value: &Value) -> Result<(), TapoError> {
    let nested = lookup(value, &["result", "data", "sec_left"])
        .and_then(Value::as_u64)
        .filter(|_| {
            lookup(value, &["result", "data", "time"]).is_some()
                && lookup(value, &["result", "data", "max_time"]).is_some()
        });
    let flat = lookup(value, &["data", "sec_left"])
        .and_then(Value::as_u64)
        .filter(|_| {
            lookup(value, &["data", "code"]).and_then(Value::as_i64)
                == Some(ERROR_SUSPENDED as i64)
        });
    match nested.or(flat) {
        Some(seconds) if seconds > 0 => Err(TapoError::Suspension { seconds }),
        _ => Ok(()),
    }
}

fn error_for(value: &Value) -> TapoError {
    match value.get("error_code").and_then(Value::as_i64) {
        Some(code) if code != 0 => TapoError::device(code as i32, None),
        _ => TapoError::Auth("unexpected login reply".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suspension_is_detected_in_both_shapes() {
        let nested = json!({
            "error_code": -40413,
            "result": {"data": {"time": 10, "max_time": 60, "sec_left": 45}}
        });
        assert!(matches!(
            check_suspension(&nested),
            Err(TapoError::Suspension { seconds: 45 })
        ));

        let flat = json!({"data": {"code": -40404, "sec_left": 12}});
        assert!(matches!(
            check_suspension(&flat),
            Err(TapoError::Suspension { seconds: 12 })
        ));

        let clear = json!({"result": {"stok": "abc"}});
        assert!(check_suspension(&clear).is_ok());
    }

    #[test]
    fn encrypt_type_accepts_array_and_string_forms() {
        let array = json!({"result": {"data": {"encrypt_type": ["1", "3"]}}});
        assert_eq!(encrypt_types(&array), vec!["1".to_string(), "3".to_string()]);
        let string = json!({"result": {"data": {"encrypt_type": "3"}}});
        assert_eq!(encrypt_types(&string), vec!["3".to_string()]);
        assert!(encrypt_types(&json!({})).is_empty());
    }
}
