//! JSON-RPC style request envelopes.
//!
//! One constructor per device method keeps the wire vocabulary in a single
//! place. Correlation fields (`requestID`, `terminal_uuid`,
//! `request_time_milis`) are attached by the protocol layer and deliberately
//! excluded from equality.

use serde::Serialize;
use serde_json::{json, Value};

use crate::credentials::AuthCredential;
use crate::crypto;

fn encode_params<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).expect("request params serialize to JSON")
}

#[derive(Debug, Clone, Serialize)]
pub struct TapoRequest {
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(rename = "requestID", skip_serializing_if = "Option::is_none")]
    request_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal_uuid: Option<String>,
    #[serde(rename = "request_time_milis", skip_serializing_if = "Option::is_none")]
    request_time_millis: Option<i64>,
}

impl PartialEq for TapoRequest {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.params == other.params
    }
}

#[derive(Debug, Clone, Serialize)]
struct HandshakeParams {
    key: String,
    time: i64,
}

#[derive(Debug, Clone, Serialize)]
struct LoginDeviceParams {
    username: String,
    password: String,
}

#[derive(Debug, Clone, Serialize)]
struct LoginDeviceParamsV2 {
    username: String,
    password2: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurePassthroughParams {
    pub request: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationParams {
    pub start_index: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlChildParams {
    pub device_id: String,
    #[serde(rename = "requestData")]
    pub request_data: TapoRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultipleRequestParams {
    pub requests: Vec<TapoRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetTriggerLogsParams {
    pub page_size: u64,
    pub start_id: u64,
}

impl TapoRequest {
    fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
            request_id: None,
            terminal_uuid: None,
            request_time_millis: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    pub fn with_request_id(mut self, request_id: i64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_terminal_uuid(mut self, uuid: &str) -> Self {
        self.terminal_uuid = Some(uuid.to_string());
        self
    }

    pub fn with_request_time_millis(mut self, millis: i64) -> Self {
        self.request_time_millis = Some(millis);
        self
    }

    pub fn handshake(public_key_pem: String, time_millis: i64) -> Self {
        let params = HandshakeParams {
            key: public_key_pem,
            time: time_millis,
        };
        Self::new("handshake", Some(encode_params(params)))
    }

    /// `login_device` with the v1 parameter form (plain base64 password).
    pub fn login(credential: &AuthCredential) -> Self {
        let params = LoginDeviceParams {
            username: crypto::b64_encode(crypto::sha1_hex(&credential.username).as_bytes()),
            password: crypto::b64_encode(credential.password.as_bytes()),
        };
        Self::new("login_device", Some(encode_params(params)))
    }

    /// `login_device` with the v2 parameter form (`password2`, SHA-1 digest).
    pub fn login_v2(credential: &AuthCredential) -> Self {
        let params = LoginDeviceParamsV2 {
            username: crypto::b64_encode(crypto::sha1_hex(&credential.username).as_bytes()),
            password2: crypto::b64_encode(crypto::sha1_hex(&credential.password).as_bytes()),
        };
        Self::new("login_device", Some(encode_params(params)))
    }

    pub fn secure_passthrough(params: SecurePassthroughParams) -> Self {
        Self::new("securePassthrough", Some(encode_params(params)))
    }

    pub fn get_device_info() -> Self {
        Self::new("get_device_info", None)
    }

    pub fn set_device_info(params: Value) -> Self {
        Self::new("set_device_info", Some(params))
    }

    pub fn get_device_usage() -> Self {
        Self::new("get_device_usage", None)
    }

    pub fn get_energy_usage() -> Self {
        Self::new("get_energy_usage", None)
    }

    pub fn get_current_power() -> Self {
        Self::new("get_current_power", None)
    }

    pub fn set_lighting_effect(effect: Value) -> Self {
        Self::new("set_lighting_effect", Some(effect))
    }

    pub fn get_child_device_list(start_index: u64) -> Self {
        Self::new(
            "get_child_device_list",
            Some(encode_params(PaginationParams { start_index })),
        )
    }

    pub fn get_child_device_component_list() -> Self {
        Self::new("get_child_device_component_list", None)
    }

    pub fn multiple_request(requests: Vec<TapoRequest>) -> Self {
        Self::new(
            "multipleRequest",
            Some(encode_params(MultipleRequestParams { requests })),
        )
    }

    pub fn control_child(device_id: &str, request: TapoRequest) -> Self {
        let params = ControlChildParams {
            device_id: device_id.to_string(),
            request_data: request,
        };
        Self::new("control_child", Some(encode_params(params)))
    }

    pub fn get_trigger_logs(params: GetTriggerLogsParams) -> Self {
        Self::new("get_trigger_logs", Some(encode_params(params)))
    }

    pub fn get_temperature_humidity_records() -> Self {
        Self::new("get_temp_humidity_records", None)
    }

    pub fn get_device_time() -> Self {
        Self::new("get_device_time", None)
    }

    pub fn get_latest_firmware() -> Self {
        Self::new("get_latest_fw", None)
    }

    pub fn get_firmware_download_state() -> Self {
        Self::new("get_fw_download_state", None)
    }

    pub fn start_firmware_upgrade() -> Self {
        Self::new("fw_download", None)
    }

    pub fn component_negotiation() -> Self {
        Self::new("component_nego", None)
    }

    pub fn play_alarm(params: Option<Value>) -> Self {
        Self::new("play_alarm", params)
    }

    pub fn stop_alarm() -> Self {
        Self::new("stop_alarm", None)
    }

    pub fn get_support_alarm_type_list() -> Self {
        Self::new("get_support_alarm_type_list", None)
    }
}

/// Builders for the hub-camera (H200) request vocabulary. Same envelope,
/// different method casing and `childControl` nesting.
impl TapoRequest {
    pub fn h200_login(
        cnonce: Option<&str>,
        password: Option<&str>,
        hashed: Option<bool>,
        digest_passwd: Option<&str>,
    ) -> Self {
        let mut params = json!({ "username": "admin" });
        let map = params.as_object_mut().expect("object literal");
        if password.is_none() {
            map.insert("encrypt_type".into(), json!("3"));
        }
        if let Some(cnonce) = cnonce {
            map.insert("cnonce".into(), json!(cnonce));
        }
        if let Some(password) = password {
            map.insert("password".into(), json!(password));
        }
        if let Some(hashed) = hashed {
            map.insert("hashed".into(), json!(hashed));
        }
        if let Some(digest_passwd) = digest_passwd {
            map.insert("digest_passwd".into(), json!(digest_passwd));
        }
        Self::new("login", Some(params))
    }

    pub fn h200_get_device_info() -> Self {
        Self::new(
            "getDeviceInfo",
            Some(json!({ "device_info": { "name": ["basic_info"] } })),
        )
    }

    pub fn h200_get_child_device_list(start_index: u64) -> Self {
        let pagination = encode_params(PaginationParams { start_index });
        Self::new(
            "getChildDeviceList",
            Some(json!({ "childControl": pagination })),
        )
    }

    pub fn h200_get_child_device_component_list(start_index: u64) -> Self {
        let pagination = encode_params(PaginationParams { start_index });
        Self::new(
            "getChildDeviceComponentList",
            Some(json!({ "childControl": pagination })),
        )
    }

    pub fn h200_control_child(device_id: &str, request: TapoRequest) -> Self {
        Self::new(
            "controlChild",
            Some(json!({
                "childControl": {
                    "device_id": device_id,
                    "request_data": request,
                }
            })),
        )
    }
}
