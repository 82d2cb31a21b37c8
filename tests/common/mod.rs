//! Scripted device-side transports for exercising the protocols end to end
//! without a live device.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tapo::crypto;
use tapo::error::TapoError;
use tapo::http::{HttpResponse, HttpTransport};
use tapo::protocol::KlapCipher;
use tapo::AuthCredential;
use tapo::KlapProtocol;

pub struct RecordedRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub cookie: Option<String>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body must be JSON")
    }
}

/// Transport that records every exchange and answers from a handler closure.
pub struct FakeHttp {
    pub requests: Mutex<Vec<RecordedRequest>>,
    handler: Box<dyn Fn(&RecordedRequest) -> HttpResponse + Send + Sync>,
}

impl FakeHttp {
    pub fn new(handler: impl Fn(&RecordedRequest) -> HttpResponse + Send + Sync + 'static) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    pub fn request_count(&self, url_fragment: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.contains(url_fragment))
            .count()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.url.clone()).collect()
    }
}

#[async_trait]
impl HttpTransport for FakeHttp {
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: Option<&[(String, String)]>,
        cookie: Option<&str>,
    ) -> Result<HttpResponse, TapoError> {
        let recorded = RecordedRequest {
            url: url.to_string(),
            body,
            headers: headers.map(<[_]>::to_vec).unwrap_or_default(),
            cookie: cookie.map(str::to_string),
        };
        let response = (self.handler)(&recorded);
        self.requests.lock().push(recorded);
        Ok(response)
    }
}

/// Hands the fake transport to protocol constructors as a trait object.
pub fn http_transport(http: &Arc<FakeHttp>) -> Arc<dyn HttpTransport> {
    http.clone()
}

pub fn ok_json(value: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        body: serde_json::to_vec(&value).unwrap(),
        cookies: Vec::new(),
    }
}

pub fn with_cookies(mut response: HttpResponse, cookies: &[(&str, &str)]) -> HttpResponse {
    response.cookies = cookies
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    response
}

/// Answers inner (tunneled) requests from a method → result table, mirroring
/// how the devices themselves behave: sets mutate the matching get fixture,
/// `control_child` routes to `<method>_<device_id>` entries.
pub struct FixtureTable {
    fixtures: Mutex<HashMap<String, Value>>,
    token: String,
}

impl FixtureTable {
    pub fn new(token: &str, fixtures: &[(&str, Value)]) -> Self {
        Self {
            fixtures: Mutex::new(
                fixtures
                    .iter()
                    .map(|(method, value)| (method.to_string(), value.clone()))
                    .collect(),
            ),
            token: token.to_string(),
        }
    }

    pub fn dispatch(&self, request: &Value) -> Value {
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let result = match method.as_str() {
            "login_device" => json!({ "token": self.token }),
            "control_child" => self.control_child(&request["params"]),
            "multipleRequest" => {
                let responses: Vec<Value> = request["params"]["requests"]
                    .as_array()
                    .map(|requests| {
                        requests
                            .iter()
                            .map(|nested| {
                                let reply = self.dispatch(nested);
                                json!({
                                    "method": nested["method"],
                                    "error_code": 0,
                                    "result": reply["result"],
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                json!({ "responses": responses })
            }
            method if method.starts_with("set_") => {
                let target = format!("get_{}", &method[4..]);
                self.merge_into(&target, &request["params"]);
                json!({})
            }
            "play_alarm" => {
                self.merge_into("get_device_info", &json!({ "in_alarm": true }));
                json!({})
            }
            "stop_alarm" => {
                self.merge_into("get_device_info", &json!({ "in_alarm": false }));
                json!({})
            }
            method => self
                .fixtures
                .lock()
                .get(method)
                .cloned()
                .unwrap_or_else(|| json!({})),
        };
        json!({ "error_code": 0, "result": result })
    }

    fn control_child(&self, params: &Value) -> Value {
        let device_id = params["device_id"].as_str().unwrap_or_default();
        let nested = &params["requestData"]["params"]["requests"][0];
        let method = nested["method"].as_str().unwrap_or_default();
        let keyed = format!("{method}_{device_id}");
        let payload = if method.starts_with("set_") {
            let target = format!("get_{}_{device_id}", &method[4..]);
            self.merge_into(&target, &nested["params"]);
            json!({})
        } else {
            self.fixtures
                .lock()
                .get(&keyed)
                .cloned()
                .unwrap_or_else(|| json!({}))
        };
        json!({
            "responseData": { "result": { "responses": [
                { "error_code": 0, "result": payload }
            ]}}
        })
    }

    fn merge_into(&self, key: &str, params: &Value) {
        let mut fixtures = self.fixtures.lock();
        let entry = fixtures.entry(key.to_string()).or_insert_with(|| json!({}));
        if let (Some(target), Some(source)) = (entry.as_object_mut(), params.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Device side of the passthrough transport over a [`FixtureTable`].
pub struct PassthroughDeviceSim {
    pub key: [u8; 16],
    pub iv: [u8; 16],
    pub table: FixtureTable,
}

impl PassthroughDeviceSim {
    pub fn new(key: [u8; 16], iv: [u8; 16], token: &str, fixtures: &[(&str, Value)]) -> Self {
        Self {
            key,
            iv,
            table: FixtureTable::new(token, fixtures),
        }
    }

    pub fn handle(&self, request: &RecordedRequest) -> HttpResponse {
        let envelope = request.json();
        match envelope["method"].as_str() {
            Some("handshake") => {
                use rsa::pkcs8::DecodePublicKey;
                let pem = envelope["params"]["key"].as_str().expect("handshake key");
                let public = rsa::RsaPublicKey::from_public_key_pem(pem).expect("client PEM");
                let mut material = Vec::with_capacity(32);
                material.extend_from_slice(&self.key);
                material.extend_from_slice(&self.iv);
                let blob = public
                    .encrypt(
                        &mut rand::rngs::OsRng,
                        rsa::Oaep::new::<sha1::Sha1>(),
                        &material,
                    )
                    .expect("RSA encrypt");
                with_cookies(
                    ok_json(json!({
                        "error_code": 0,
                        "result": { "key": crypto::b64_encode(&blob) }
                    })),
                    &[("TP_SESSIONID", "PTSESSION")],
                )
            }
            Some("securePassthrough") => {
                let encrypted = envelope["params"]["request"].as_str().expect("inner body");
                let plaintext = crypto::aes_cbc_decrypt(
                    &self.key,
                    &self.iv,
                    &crypto::b64_decode(encrypted).unwrap(),
                )
                .expect("inner decrypt");
                let inner: Value = serde_json::from_slice(&plaintext).unwrap();
                let reply = self.table.dispatch(&inner);
                let encrypted_reply = crypto::aes_cbc_encrypt(
                    &self.key,
                    &self.iv,
                    &serde_json::to_vec(&reply).unwrap(),
                );
                ok_json(json!({
                    "error_code": 0,
                    "result": { "response": crypto::b64_encode(&encrypted_reply) }
                }))
            }
            _ => ok_json(json!({ "error_code": -1 })),
        }
    }
}

/// Device side of the KLAP transport over a [`FixtureTable`].
pub struct KlapDeviceSim {
    auth_hash: Vec<u8>,
    remote_seed: [u8; 16],
    cipher: Mutex<Option<KlapCipher>>,
    pub table: FixtureTable,
    /// When set, operational requests are refused with this HTTP status.
    pub refuse_requests_with: Option<u16>,
}

impl KlapDeviceSim {
    pub fn new(credential: &AuthCredential, fixtures: &[(&str, Value)]) -> Self {
        Self {
            auth_hash: KlapProtocol::auth_hash(credential),
            remote_seed: [0xAA; 16],
            cipher: Mutex::new(None),
            table: FixtureTable::new("unused", fixtures),
            refuse_requests_with: None,
        }
    }

    pub fn handle(&self, request: &RecordedRequest) -> HttpResponse {
        if request.url.contains("/handshake1") {
            let mut local_seed = [0u8; 16];
            local_seed.copy_from_slice(&request.body[..16]);
            let server_hash =
                crypto::sha256(&[&local_seed[..], self.auth_hash.as_slice()].concat());
            *self.cipher.lock() = Some(KlapCipher::new(
                &local_seed,
                &self.remote_seed,
                &self.auth_hash,
            ));
            let mut body = Vec::with_capacity(48);
            body.extend_from_slice(&self.remote_seed);
            body.extend_from_slice(&server_hash);
            with_cookies(
                HttpResponse {
                    status: 200,
                    body,
                    cookies: Vec::new(),
                },
                &[("TP_SESSIONID", "KLAPSESSION"), ("TIMEOUT", "1440")],
            )
        } else if request.url.contains("/handshake2") {
            HttpResponse {
                status: 200,
                body: Vec::new(),
                cookies: Vec::new(),
            }
        } else if request.url.contains("/request") {
            if let Some(status) = self.refuse_requests_with {
                return HttpResponse {
                    status,
                    body: Vec::new(),
                    cookies: Vec::new(),
                };
            }
            let seq: i32 = request
                .url
                .split("seq=")
                .nth(1)
                .and_then(|s| s.parse().ok())
                .expect("seq query");
            let mut guard = self.cipher.lock();
            let cipher = guard.as_mut().expect("handshake must run first");
            let plaintext = cipher.decrypt(seq, &request.body).expect("client body");
            let inner: Value = serde_json::from_slice(&plaintext).unwrap();
            let reply = self.table.dispatch(&inner);
            let (_, body) = cipher.encrypt(&serde_json::to_vec(&reply).unwrap());
            HttpResponse {
                status: 200,
                body,
                cookies: Vec::new(),
            }
        } else {
            // Passthrough probe endpoint on a KLAP-only device.
            ok_json(json!({ "error_code": 1003 }))
        }
    }
}
