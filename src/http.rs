//! Cookie-less HTTP POST transport shared by all protocols.
//!
//! Session cookies are protocol state, never client state: the underlying
//! client keeps no jar, forces `Connection: close` and drains every body, so
//! one shared [`AsyncHttp`] can serve many protocol instances without leaking
//! session material between them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, COOKIE, SET_COOKIE};

use crate::error::TapoError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw reply from one POST exchange.
///
/// Status and cookies are surfaced untouched; protocols own the decision of
/// which statuses are fatal (a 500 on a secure H200 session is not).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub cookies: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn json(&self) -> Result<serde_json::Value, TapoError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| TapoError::Protocol(format!("malformed JSON body: {e}")))
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Seam between the protocols and the network.
///
/// The production implementation is [`AsyncHttp`]; tests drive the protocols
/// through scripted implementations of this trait instead of a live device.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues one POST. `headers` replaces the default JSON header set when
    /// present; `cookie` is sent verbatim as the `Cookie` header.
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: Option<&[(String, String)]>,
        cookie: Option<&str>,
    ) -> Result<HttpResponse, TapoError>;
}

/// Header set used for plain JSON envelopes.
pub fn json_headers() -> Vec<(String, String)> {
    vec![
        ("Content-Type".into(), "application/json".into()),
        ("Accept".into(), "application/json".into()),
        ("requestByApp".into(), "true".into()),
    ]
}

/// reqwest-backed transport.
pub struct AsyncHttp {
    client: reqwest::Client,
}

impl AsyncHttp {
    pub fn new() -> Result<Self, TapoError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TapoError> {
        // Hub firmwares serve self-signed certificates on 443.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TapoError::Transport(format!("http client init: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for AsyncHttp {
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: Option<&[(String, String)]>,
        cookie: Option<&str>,
    ) -> Result<HttpResponse, TapoError> {
        let mut header_map = HeaderMap::new();
        let defaults = json_headers();
        for (name, value) in headers.unwrap_or(&defaults) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TapoError::Transport(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TapoError::Transport(format!("invalid header value: {e}")))?;
            header_map.insert(name, value);
        }
        header_map.insert(CONNECTION, HeaderValue::from_static("close"));
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| TapoError::Transport(format!("invalid cookie value: {e}")))?;
            header_map.insert(COOKIE, value);
        }

        let response = self
            .client
            .post(url)
            .headers(header_map)
            .body(body)
            .send()
            .await
            .map_err(|e| TapoError::Transport(format!("POST {url}: {e}")))?;

        let status = response.status().as_u16();
        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        // Fully drain the body so the connection can be torn down cleanly.
        let body = response
            .bytes()
            .await
            .map_err(|e| TapoError::Transport(format!("read body: {e}")))?
            .to_vec();

        Ok(HttpResponse {
            status,
            body,
            cookies,
        })
    }
}

fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let first = header.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    Some((name.trim().to_string(), value.trim().to_string()))
}
