//! State and event payloads reported by hub child devices.

use serde::Deserialize;
use serde_json::Value;

use crate::error::TapoError;

/// Fields every hub child reports alongside its sensor-specific state.
#[derive(Debug, Clone, Deserialize)]
pub struct HubChildBaseInfo {
    pub device_id: String,
    #[serde(default)]
    pub parent_device_id: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub hw_ver: String,
    #[serde(default)]
    pub fw_ver: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub rssi: i32,
    #[serde(default)]
    pub signal_level: i32,
    #[serde(default)]
    pub at_low_battery: bool,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "lastOnboardingTimestamp", default)]
    pub last_onboarding_timestamp: i64,
}

impl HubChildBaseInfo {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        serde_json::from_value(value.clone())
            .map_err(|e| TapoError::Protocol(format!("malformed child base info: {e}")))
    }
}

fn parse_child_state<T: serde::de::DeserializeOwned>(
    value: &Value,
    what: &str,
) -> Result<T, TapoError> {
    serde_json::from_value(value.clone())
        .map_err(|e| TapoError::Protocol(format!("malformed {what} state: {e}")))
}

/// T31x thermo-humidity sensor.
#[derive(Debug, Clone, Deserialize)]
pub struct T31DeviceState {
    #[serde(flatten)]
    pub base: HubChildBaseInfo,
    #[serde(rename = "current_temp", default)]
    pub current_temperature: f64,
    #[serde(rename = "current_temp_exception", default)]
    pub current_temperature_exception: f64,
    #[serde(default)]
    pub current_humidity: i32,
    #[serde(default)]
    pub current_humidity_exception: i32,
    #[serde(rename = "temp_unit", default)]
    pub temperature_unit: String,
    #[serde(rename = "report_interval", default)]
    pub report_interval_seconds: u64,
}

impl T31DeviceState {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "T31")
    }
}

/// Past-day measurement history from `get_temp_humidity_records`.
#[derive(Debug, Clone, Deserialize)]
pub struct TemperatureHumidityRecords {
    #[serde(default)]
    pub local_time: i64,
    #[serde(default)]
    pub past24h_temp: Vec<Value>,
    #[serde(default)]
    pub past24h_humidity: Vec<Value>,
}

impl TemperatureHumidityRecords {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "temperature/humidity records")
    }
}

/// T110 contact sensor.
#[derive(Debug, Clone, Deserialize)]
pub struct T110SmartDoorState {
    #[serde(flatten)]
    pub base: HubChildBaseInfo,
    #[serde(default)]
    pub open: bool,
    #[serde(rename = "report_interval", default)]
    pub report_interval_seconds: u64,
}

impl T110SmartDoorState {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "T110")
    }
}

/// S200B button / dial.
#[derive(Debug, Clone, Deserialize)]
pub struct S200BDeviceState {
    #[serde(flatten)]
    pub base: HubChildBaseInfo,
    #[serde(rename = "report_interval", default)]
    pub report_interval_seconds: u64,
}

impl S200BDeviceState {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "S200B")
    }
}

/// T100 motion sensor.
#[derive(Debug, Clone, Deserialize)]
pub struct T100MotionSensorState {
    #[serde(flatten)]
    pub base: HubChildBaseInfo,
    #[serde(default)]
    pub detected: bool,
    #[serde(rename = "report_interval", default)]
    pub report_interval_seconds: u64,
}

impl T100MotionSensorState {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "T100")
    }
}

/// KE100 thermostatic radiator valve.
#[derive(Debug, Clone, Deserialize)]
pub struct KE100DeviceState {
    #[serde(flatten)]
    pub base: HubChildBaseInfo,
    #[serde(rename = "current_temp", default)]
    pub current_temperature: f64,
    #[serde(rename = "target_temp", default)]
    pub target_temperature: f64,
    #[serde(rename = "temp_offset", default)]
    pub temperature_offset: f64,
    #[serde(rename = "temp_unit", default)]
    pub temperature_unit: String,
    #[serde(rename = "min_control_temp", default)]
    pub min_control_temperature: i32,
    #[serde(rename = "max_control_temp", default)]
    pub max_control_temperature: i32,
    #[serde(default)]
    pub battery_percentage: i32,
    #[serde(default)]
    pub frost_protection_on: bool,
    #[serde(default)]
    pub child_protection: bool,
    #[serde(default)]
    pub trv_states: Vec<String>,
}

impl KE100DeviceState {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "KE100")
    }
}

/// T300 water-leak sensor.
#[derive(Debug, Clone, Deserialize)]
pub struct LeakDeviceState {
    #[serde(flatten)]
    pub base: HubChildBaseInfo,
    #[serde(default)]
    pub in_alarm: bool,
    #[serde(default)]
    pub water_leak_status: String,
}

impl LeakDeviceState {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "T300")
    }
}

/// S210/S220 in-wall switch.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchChildDeviceState {
    #[serde(flatten)]
    pub base: HubChildBaseInfo,
    #[serde(default)]
    pub device_on: bool,
    #[serde(default)]
    pub led_off: i32,
}

impl SwitchChildDeviceState {
    pub fn try_from_value(value: &Value) -> Result<Self, TapoError> {
        parse_child_state(value, "switch child")
    }
}

/// Common view the event-log poller needs from any sensor event.
pub trait SensorEvent {
    fn event_id(&self) -> u64;
    fn timestamp_millis(&self) -> u64;
}

/// One page of a sensor's trigger log, newest-first as reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerLogResponse<E> {
    pub start_id: u64,
    pub sum: u64,
    pub logs: Vec<E>,
}

impl<E> TriggerLogResponse<E> {
    /// Parses `{start_id, sum, logs: [...]}`, dropping entries the parser
    /// does not recognize.
    pub fn try_from_value(
        value: &Value,
        parse: impl Fn(&Value) -> Option<E>,
    ) -> Result<Self, TapoError> {
        let start_id = value.get("start_id").and_then(Value::as_u64).unwrap_or(0);
        let sum = value.get("sum").and_then(Value::as_u64).unwrap_or(0);
        let logs = value
            .get("logs")
            .and_then(Value::as_array)
            .ok_or_else(|| TapoError::Protocol("trigger log reply missing logs".into()))?
            .iter()
            .filter_map(|entry| parse(entry))
            .collect();
        Ok(Self {
            start_id,
            sum,
            logs,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S200BEventKind {
    SingleClick,
    DoubleClick,
    Rotation { degrees: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct S200BEvent {
    pub id: u64,
    pub timestamp_millis: u64,
    pub kind: S200BEventKind,
}

pub fn parse_s200b_event(value: &Value) -> Option<S200BEvent> {
    let id = value.get("id")?.as_u64()?;
    let timestamp_millis = value.get("timestamp")?.as_u64()?;
    let kind = match value.get("event")?.as_str()? {
        "singleClick" => S200BEventKind::SingleClick,
        "doubleClick" => S200BEventKind::DoubleClick,
        "rotation" => S200BEventKind::Rotation {
            degrees: value
                .get("params")
                .and_then(|p| p.get("rotate_deg"))
                .and_then(Value::as_i64)?,
        },
        _ => return None,
    };
    Some(S200BEvent {
        id,
        timestamp_millis,
        kind,
    })
}

impl SensorEvent for S200BEvent {
    fn event_id(&self) -> u64 {
        self.id
    }

    fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionEventKind {
    KeepAlive,
    Motion,
    Open,
    Close,
}

/// Events shared by T100 motion and T110 contact sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub id: u64,
    pub timestamp_millis: u64,
    pub kind: MotionEventKind,
}

pub fn parse_motion_event(value: &Value) -> Option<MotionEvent> {
    let id = value.get("id")?.as_u64()?;
    let timestamp_millis = value.get("timestamp")?.as_u64()?;
    let kind = match value.get("event")?.as_str()? {
        "keepAlive" => MotionEventKind::KeepAlive,
        "motion" => MotionEventKind::Motion,
        "open" => MotionEventKind::Open,
        "close" => MotionEventKind::Close,
        _ => return None,
    };
    Some(MotionEvent {
        id,
        timestamp_millis,
        kind,
    })
}

impl SensorEvent for MotionEvent {
    fn event_id(&self) -> u64 {
        self.id
    }

    fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }
}
