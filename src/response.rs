//! Typed views over device replies.
//!
//! The envelope contract is structural: `error_code == 0` means `result` is
//! the payload, anything else is a domain error. Payload shapes beyond the
//! fields the core needs stay opaque (`extra` maps).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::crypto;
use crate::error::TapoError;

pub mod child;

/// Response envelope common to all three transports.
#[derive(Debug, Clone, Deserialize)]
pub struct TapoResponse {
    pub error_code: i32,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl TapoResponse {
    pub fn try_from_value(value: Value) -> Result<Self, TapoError> {
        serde_json::from_value(value)
            .map_err(|e| TapoError::Protocol(format!("malformed response envelope: {e}")))
    }

    /// Applies the envelope invariant: zero yields the payload, nonzero a
    /// [`TapoError::Device`].
    pub fn into_result(self) -> Result<Value, TapoError> {
        if self.error_code == 0 {
            Ok(self.result.unwrap_or_else(|| Value::Object(Default::default())))
        } else {
            Err(TapoError::device(self.error_code, self.msg))
        }
    }
}

/// Feature flags negotiated once per firmware via `component_nego`.
///
/// Devices answer in one of two array shapes (`{id, ver_code}` or
/// `{name, version}`); membership is the only primitive the device layer uses.
#[derive(Debug, Clone, Default)]
pub struct Components {
    versions: HashMap<String, i64>,
}

impl Components {
    pub fn try_from_value(value: &Value) -> Self {
        let mut versions = HashMap::new();
        if let Some(list) = value.get("component_list").and_then(Value::as_array) {
            for entry in list {
                let name = entry
                    .get("id")
                    .or_else(|| entry.get("name"))
                    .and_then(Value::as_str);
                let version = entry
                    .get("ver_code")
                    .or_else(|| entry.get("version"))
                    .and_then(Value::as_i64);
                if let (Some(name), Some(version)) = (name, version) {
                    versions.insert(name.to_string(), version);
                }
            }
        }
        Self { versions }
    }

    pub fn has(&self, component: &str) -> bool {
        self.get_version(component).is_some()
    }

    pub fn get_version(&self, component: &str) -> Option<i64> {
        self.versions.get(component).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}

/// Identity snapshot every Tapo device reports from `get_device_info`.
///
/// The nickname travels base64-encoded and is decoded on access; fields the
/// core does not interpret are preserved in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub(crate) nickname: String,
    #[serde(default)]
    pub hw_ver: String,
    #[serde(default)]
    pub fw_ver: String,
    #[serde(default)]
    pub hw_id: Option<String>,
    #[serde(default)]
    pub oem_id: Option<String>,
    #[serde(default)]
    pub overheated: bool,
    #[serde(default)]
    pub rssi: i32,
    #[serde(default)]
    pub signal_level: i32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl DeviceInfo {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        serde_json::from_value(value.clone())
            .map_err(|e| TapoError::Protocol(format!("malformed device_info: {e}")))
    }

    pub fn nickname(&self) -> String {
        crypto::b64_decode(&self.nickname)
            .ok()
            .and_then(|raw| String::from_utf8(raw).ok())
            .unwrap_or_else(|| self.nickname.clone())
    }

    pub fn raw_nickname(&self) -> &str {
        &self.nickname
    }
}

/// One page (or the merged whole) of a hub/strip child listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChildDeviceList {
    #[serde(default)]
    pub child_device_list: Vec<Value>,
    #[serde(default)]
    pub start_index: u64,
    #[serde(default)]
    pub sum: u64,
}

impl ChildDeviceList {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        serde_json::from_value(value.clone())
            .map_err(|e| TapoError::Protocol(format!("malformed child device list: {e}")))
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.child_device_list
            .iter()
            .filter_map(|c| c.get("device_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.child_device_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_device_list.is_empty()
    }

    pub(crate) fn absorb_page(&mut self, page: ChildDeviceList) {
        self.sum = page.sum;
        self.child_device_list.extend(page.child_device_list);
    }
}

/// Accumulated energy counters from `get_energy_usage`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnergyInfo {
    #[serde(default)]
    pub today_runtime: i64,
    #[serde(default)]
    pub month_runtime: i64,
    #[serde(default)]
    pub today_energy: i64,
    #[serde(default)]
    pub month_energy: i64,
    #[serde(default)]
    pub current_power: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Instantaneous power from `get_current_power`.
#[derive(Debug, Clone, Deserialize)]
pub struct PowerInfo {
    #[serde(default)]
    pub current_power: i64,
}

/// Usage-by-period rollups from `get_device_usage`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceUsageInfo {
    #[serde(default)]
    pub time_usage: UsageByPeriod,
    #[serde(default)]
    pub power_usage: UsageByPeriod,
    #[serde(default)]
    pub saved_power: UsageByPeriod,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageByPeriod {
    #[serde(default)]
    pub today: i64,
    #[serde(default)]
    pub past7: i64,
    #[serde(default)]
    pub past30: i64,
}

/// Tones a hub can play, from `get_support_alarm_type_list`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlarmTypeList {
    #[serde(default)]
    pub alarm_type_list: Vec<String>,
}

/// Device clock information.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeInfo {
    #[serde(default)]
    pub time_diff: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub region: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_invariant() {
        let ok = TapoResponse::try_from_value(json!({"error_code": 0, "result": {"on": true}}))
            .unwrap();
        assert_eq!(ok.into_result().unwrap()["on"], json!(true));

        let err = TapoResponse::try_from_value(json!({"error_code": -1501, "msg": "bad login"}))
            .unwrap();
        match err.into_result() {
            Err(TapoError::Device { code, msg }) => {
                assert_eq!(code, -1501);
                assert_eq!(msg, "bad login");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn components_parse_both_wire_shapes() {
        let by_id = Components::try_from_value(&json!({
            "component_list": [
                {"id": "energy_monitoring", "ver_code": 2},
                {"id": "control_child", "ver_code": 1},
            ]
        }));
        assert!(by_id.has("energy_monitoring"));
        assert_eq!(by_id.get_version("control_child"), Some(1));

        let by_name = Components::try_from_value(&json!({
            "component_list": [{"name": "alarm", "version": 3}]
        }));
        assert!(by_name.has("alarm"));
        assert!(!by_name.has("color"));
    }

    #[test]
    fn has_iff_version_present() {
        let components = Components::try_from_value(&json!({
            "component_list": [{"id": "color", "ver_code": 1}]
        }));
        for name in ["color", "color_temperature", "light_strip"] {
            assert_eq!(
                components.has(name),
                components.get_version(name).is_some()
            );
        }
    }

    #[test]
    fn nickname_decodes_lazily() {
        let info = DeviceInfo::try_from_value(&json!({
            "device_id": "8022",
            "type": "SMART.TAPOPLUG",
            "model": "P110",
            "mac": "AA-BB-CC-DD-EE-FF",
            "nickname": "TGl2aW5nIHJvb20=",
            "hw_ver": "1.0",
            "fw_ver": "1.2.3",
            "overheated": false,
            "rssi": -41,
            "signal_level": 3,
            "device_on": true
        }))
        .unwrap();
        assert_eq!(info.nickname(), "Living room");
        assert_eq!(info.raw_nickname(), "TGl2aW5nIHJvb20=");
        assert_eq!(info.extra["device_on"], json!(true));
    }

    #[test]
    fn child_list_pagination_merge() {
        let mut all = ChildDeviceList::try_from_value(&json!({
            "child_device_list": [{"device_id": "a"}],
            "start_index": 0,
            "sum": 2
        }))
        .unwrap();
        let page = ChildDeviceList::try_from_value(&json!({
            "child_device_list": [{"device_id": "b"}],
            "start_index": 1,
            "sum": 2
        }))
        .unwrap();
        all.absorb_page(page);
        assert_eq!(all.device_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(all.len() as u64, all.sum);
    }
}
