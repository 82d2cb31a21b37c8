//! Per-model wrappers for devices paired to a hub.
//!
//! Children never talk to the network directly; every fetch and control goes
//! through the hub's `control_child` routing.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::client::TapoClient;
use crate::error::TapoError;
use crate::poll::{EventLogsStateTracker, EventSubscriptionOptions, PollSubscription, PollTracker, StateProvider};
use crate::request::{GetTriggerLogsParams, TapoRequest};
use crate::response::child::{
    parse_motion_event, parse_s200b_event, HubChildBaseInfo, KE100DeviceState, LeakDeviceState,
    MotionEvent, S200BDeviceState, S200BEvent, SensorEvent, SwitchChildDeviceState,
    T100MotionSensorState, T110SmartDoorState, T31DeviceState, TemperatureHumidityRecords,
    TriggerLogResponse,
};
use crate::response::{Components, DeviceInfo};

const EVENT_LOG_PAGE_SIZE: u64 = 5;

/// Snapshot a child caches between updates.
pub struct ChildSnapshot {
    pub components: Components,
    pub device_info: DeviceInfo,
    pub base: HubChildBaseInfo,
    pub state: Value,
}

/// Shared plumbing: routing, the cached snapshot and common accessors.
pub struct HubChildCore {
    client: Arc<TapoClient>,
    device_id: String,
    model: String,
    hub_hw_id: Option<String>,
    hub_oem_id: Option<String>,
    last_update: Option<ChildSnapshot>,
}

impl HubChildCore {
    fn new(
        client: Arc<TapoClient>,
        base: &HubChildBaseInfo,
        hub_hw_id: Option<String>,
        hub_oem_id: Option<String>,
    ) -> Self {
        Self {
            client,
            device_id: base.device_id.clone(),
            model: base.model.clone(),
            hub_hw_id,
            hub_oem_id,
            last_update: None,
        }
    }

    pub(crate) async fn control(&self, request: TapoRequest) -> Result<Value, TapoError> {
        self.client.control_child(&self.device_id, request).await
    }

    /// Replaces the snapshot; components are fetched once per child.
    async fn update(&mut self) -> Result<Value, TapoError> {
        let components = match &self.last_update {
            Some(snapshot) => snapshot.components.clone(),
            None => {
                let value = self.control(TapoRequest::component_negotiation()).await?;
                Components::try_from_value(&value)
            }
        };
        let state = self.control(TapoRequest::get_device_info()).await?;
        let base = HubChildBaseInfo::try_from_value(&state)?;
        let device_info = DeviceInfo {
            device_id: base.device_id.clone(),
            device_type: base.device_type.clone(),
            model: base.model.clone(),
            mac: base.mac.clone(),
            nickname: base.nickname.clone(),
            hw_ver: base.hw_ver.clone(),
            fw_ver: base.fw_ver.clone(),
            hw_id: self.hub_hw_id.clone(),
            oem_id: self.hub_oem_id.clone(),
            overheated: false,
            rssi: base.rssi,
            signal_level: base.signal_level,
            extra: Default::default(),
        };
        self.last_update = Some(ChildSnapshot {
            components,
            device_info,
            base,
            state: state.clone(),
        });
        Ok(state)
    }

    fn snapshot(&self) -> Result<&ChildSnapshot, TapoError> {
        self.last_update.as_ref().ok_or(TapoError::NeedsUpdate)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn device_info(&self) -> Result<&DeviceInfo, TapoError> {
        Ok(&self.snapshot()?.device_info)
    }

    pub fn components(&self) -> Result<&Components, TapoError> {
        Ok(&self.snapshot()?.components)
    }

    pub fn state(&self) -> Result<&Value, TapoError> {
        Ok(&self.snapshot()?.state)
    }

    pub fn nickname(&self) -> Result<String, TapoError> {
        Ok(self.snapshot()?.device_info.nickname())
    }

    pub fn parent_device_id(&self) -> Result<&str, TapoError> {
        Ok(&self.snapshot()?.base.parent_device_id)
    }

    pub fn battery_low(&self) -> Result<bool, TapoError> {
        Ok(self.snapshot()?.base.at_low_battery)
    }

    pub fn last_onboarding_timestamp(&self) -> Result<i64, TapoError> {
        Ok(self.snapshot()?.base.last_onboarding_timestamp)
    }

    fn event_log_tracker<E>(
        &self,
        options: EventSubscriptionOptions,
        parse: fn(&Value) -> Option<E>,
    ) -> PollTracker<TriggerLogResponse<E>, E>
    where
        E: SensorEvent + Clone + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let device_id = self.device_id.clone();
        let provider: StateProvider<TriggerLogResponse<E>> = Arc::new(move |_last| {
            let client = Arc::clone(&client);
            let device_id = device_id.clone();
            Box::pin(async move {
                let value = client
                    .get_child_event_logs(&device_id, EVENT_LOG_PAGE_SIZE, 0)
                    .await?;
                TriggerLogResponse::try_from_value(&value, parse)
            })
        });
        PollTracker::new(
            provider,
            EventLogsStateTracker::new(options.debounce),
            options.polling_interval,
        )
    }

    async fn fetch_event_logs<E>(
        &self,
        page_size: u64,
        start_id: u64,
        parse: fn(&Value) -> Option<E>,
    ) -> Result<TriggerLogResponse<E>, TapoError> {
        let value = self
            .control(TapoRequest::get_trigger_logs(GetTriggerLogsParams {
                page_size,
                start_id,
            }))
            .await?;
        TriggerLogResponse::try_from_value(&value, parse)
    }
}

/// T31x thermo-humidity sensor.
pub struct T31Device {
    core: HubChildCore,
    state: Option<T31DeviceState>,
}

impl T31Device {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let value = self.core.update().await?;
        self.state = Some(T31DeviceState::try_from_value(&value)?);
        Ok(())
    }

    pub fn core(&self) -> &HubChildCore {
        &self.core
    }

    fn state(&self) -> Result<&T31DeviceState, TapoError> {
        self.state.as_ref().ok_or(TapoError::NeedsUpdate)
    }

    pub fn current_temperature(&self) -> Result<f64, TapoError> {
        Ok(self.state()?.current_temperature)
    }

    pub fn current_humidity(&self) -> Result<i32, TapoError> {
        Ok(self.state()?.current_humidity)
    }

    pub fn temperature_unit(&self) -> Result<&str, TapoError> {
        Ok(&self.state()?.temperature_unit)
    }

    pub fn report_interval_seconds(&self) -> Result<u64, TapoError> {
        Ok(self.state()?.report_interval_seconds)
    }

    pub async fn get_temperature_humidity_records(
        &self,
    ) -> Result<TemperatureHumidityRecords, TapoError> {
        let value = self
            .core
            .control(TapoRequest::get_temperature_humidity_records())
            .await?;
        TemperatureHumidityRecords::try_from_value(&value)
    }
}

/// T110 contact sensor.
pub struct T110SmartDoor {
    core: HubChildCore,
    state: Option<T110SmartDoorState>,
    tracker: Option<PollTracker<TriggerLogResponse<MotionEvent>, MotionEvent>>,
}

impl T110SmartDoor {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let value = self.core.update().await?;
        self.state = Some(T110SmartDoorState::try_from_value(&value)?);
        Ok(())
    }

    pub fn core(&self) -> &HubChildCore {
        &self.core
    }

    pub fn is_open(&self) -> Result<bool, TapoError> {
        Ok(self
            .state
            .as_ref()
            .ok_or(TapoError::NeedsUpdate)?
            .open)
    }

    pub async fn get_event_logs(
        &self,
        page_size: u64,
        start_id: u64,
    ) -> Result<TriggerLogResponse<MotionEvent>, TapoError> {
        self.core
            .fetch_event_logs(page_size, start_id, parse_motion_event)
            .await
    }

    pub fn subscribe_event_logs(
        &mut self,
        options: EventSubscriptionOptions,
        callback: impl Fn(&MotionEvent) + Send + Sync + 'static,
    ) -> PollSubscription {
        self.tracker
            .get_or_insert_with(|| self.core.event_log_tracker(options, parse_motion_event))
            .subscribe(callback)
    }
}

/// S200B button / rotary dial.
pub struct S200ButtonDevice {
    core: HubChildCore,
    state: Option<S200BDeviceState>,
    tracker: Option<PollTracker<TriggerLogResponse<S200BEvent>, S200BEvent>>,
}

impl S200ButtonDevice {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let value = self.core.update().await?;
        self.state = Some(S200BDeviceState::try_from_value(&value)?);
        Ok(())
    }

    pub fn core(&self) -> &HubChildCore {
        &self.core
    }

    pub fn report_interval_seconds(&self) -> Result<u64, TapoError> {
        Ok(self
            .state
            .as_ref()
            .ok_or(TapoError::NeedsUpdate)?
            .report_interval_seconds)
    }

    /// Latest events newest-first; `start_id = 0` asks for the most recent
    /// `page_size` entries.
    pub async fn get_event_logs(
        &self,
        page_size: u64,
        start_id: u64,
    ) -> Result<TriggerLogResponse<S200BEvent>, TapoError> {
        self.core
            .fetch_event_logs(page_size, start_id, parse_s200b_event)
            .await
    }

    pub fn subscribe_event_logs(
        &mut self,
        options: EventSubscriptionOptions,
        callback: impl Fn(&S200BEvent) + Send + Sync + 'static,
    ) -> PollSubscription {
        self.tracker
            .get_or_insert_with(|| self.core.event_log_tracker(options, parse_s200b_event))
            .subscribe(callback)
    }
}

/// T100 motion sensor.
pub struct T100MotionSensor {
    core: HubChildCore,
    state: Option<T100MotionSensorState>,
    tracker: Option<PollTracker<TriggerLogResponse<MotionEvent>, MotionEvent>>,
}

impl T100MotionSensor {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let value = self.core.update().await?;
        self.state = Some(T100MotionSensorState::try_from_value(&value)?);
        Ok(())
    }

    pub fn core(&self) -> &HubChildCore {
        &self.core
    }

    pub fn is_detected(&self) -> Result<bool, TapoError> {
        Ok(self
            .state
            .as_ref()
            .ok_or(TapoError::NeedsUpdate)?
            .detected)
    }

    pub async fn get_event_logs(
        &self,
        page_size: u64,
        start_id: u64,
    ) -> Result<TriggerLogResponse<MotionEvent>, TapoError> {
        self.core
            .fetch_event_logs(page_size, start_id, parse_motion_event)
            .await
    }

    pub fn subscribe_event_logs(
        &mut self,
        options: EventSubscriptionOptions,
        callback: impl Fn(&MotionEvent) + Send + Sync + 'static,
    ) -> PollSubscription {
        self.tracker
            .get_or_insert_with(|| self.core.event_log_tracker(options, parse_motion_event))
            .subscribe(callback)
    }
}

/// KE100 thermostatic radiator valve.
pub struct KE100Device {
    core: HubChildCore,
    state: Option<KE100DeviceState>,
}

impl KE100Device {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let value = self.core.update().await?;
        self.state = Some(KE100DeviceState::try_from_value(&value)?);
        Ok(())
    }

    pub fn core(&self) -> &HubChildCore {
        &self.core
    }

    fn state(&self) -> Result<&KE100DeviceState, TapoError> {
        self.state.as_ref().ok_or(TapoError::NeedsUpdate)
    }

    pub fn current_temperature(&self) -> Result<f64, TapoError> {
        Ok(self.state()?.current_temperature)
    }

    pub fn target_temperature(&self) -> Result<f64, TapoError> {
        Ok(self.state()?.target_temperature)
    }

    pub fn temperature_offset(&self) -> Result<f64, TapoError> {
        Ok(self.state()?.temperature_offset)
    }

    pub fn control_temperature_range(&self) -> Result<(i32, i32), TapoError> {
        let state = self.state()?;
        Ok((
            state.min_control_temperature,
            state.max_control_temperature,
        ))
    }

    pub fn battery_percentage(&self) -> Result<i32, TapoError> {
        Ok(self.state()?.battery_percentage)
    }

    pub fn is_frost_protection_on(&self) -> Result<bool, TapoError> {
        Ok(self.state()?.frost_protection_on)
    }

    pub fn is_child_protection_on(&self) -> Result<bool, TapoError> {
        Ok(self.state()?.child_protection)
    }

    pub async fn set_target_temperature(&self, target: f64) -> Result<(), TapoError> {
        self.send_control(json!({ "target_temp": target })).await
    }

    pub async fn set_temperature_offset(&self, offset: f64) -> Result<(), TapoError> {
        self.send_control(json!({ "temp_offset": offset })).await
    }

    pub async fn set_frost_protection(&self, on: bool) -> Result<(), TapoError> {
        self.send_control(json!({ "frost_protection_on": on })).await
    }

    pub async fn set_child_protection(&self, on: bool) -> Result<(), TapoError> {
        self.send_control(json!({ "child_protection": on })).await
    }

    async fn send_control(&self, params: Value) -> Result<(), TapoError> {
        self.core
            .control(TapoRequest::set_device_info(params))
            .await
            .map(|_| ())
    }
}

/// T300 water-leak sensor.
pub struct WaterLeakSensor {
    core: HubChildCore,
    state: Option<LeakDeviceState>,
}

impl WaterLeakSensor {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let value = self.core.update().await?;
        self.state = Some(LeakDeviceState::try_from_value(&value)?);
        Ok(())
    }

    pub fn core(&self) -> &HubChildCore {
        &self.core
    }

    fn state(&self) -> Result<&LeakDeviceState, TapoError> {
        self.state.as_ref().ok_or(TapoError::NeedsUpdate)
    }

    pub fn is_alarm_active(&self) -> Result<bool, TapoError> {
        Ok(self.state()?.in_alarm)
    }

    pub fn water_leak_status(&self) -> Result<&str, TapoError> {
        Ok(&self.state()?.water_leak_status)
    }
}

/// S210/S220 in-wall switch.
pub struct SwitchChildDevice {
    core: HubChildCore,
    state: Option<SwitchChildDeviceState>,
}

impl SwitchChildDevice {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let value = self.core.update().await?;
        self.state = Some(SwitchChildDeviceState::try_from_value(&value)?);
        Ok(())
    }

    pub fn core(&self) -> &HubChildCore {
        &self.core
    }

    fn state(&self) -> Result<&SwitchChildDeviceState, TapoError> {
        self.state.as_ref().ok_or(TapoError::NeedsUpdate)
    }

    pub fn is_on(&self) -> Result<bool, TapoError> {
        Ok(self.state()?.device_on)
    }

    pub fn led_off(&self) -> Result<i32, TapoError> {
        Ok(self.state()?.led_off)
    }

    pub async fn turn_on(&self) -> Result<(), TapoError> {
        self.set_on(true).await
    }

    pub async fn turn_off(&self) -> Result<(), TapoError> {
        self.set_on(false).await
    }

    async fn set_on(&self, on: bool) -> Result<(), TapoError> {
        self.core
            .control(TapoRequest::set_device_info(json!({ "device_on": on })))
            .await
            .map(|_| ())
    }
}

/// Every child kind a hub can carry.
pub enum HubChild {
    T31(T31Device),
    T110(T110SmartDoor),
    S200B(S200ButtonDevice),
    T100(T100MotionSensor),
    Ke100(KE100Device),
    T300(WaterLeakSensor),
    Switch(SwitchChildDevice),
}

impl HubChild {
    /// Picks a wrapper by model substring; unknown models return `None` and
    /// are dropped by the hub.
    pub(crate) fn from_base(
        client: Arc<TapoClient>,
        base: &HubChildBaseInfo,
        hub_hw_id: Option<String>,
        hub_oem_id: Option<String>,
    ) -> Option<Self> {
        let core = HubChildCore::new(client, base, hub_hw_id, hub_oem_id);
        let model = base.model.to_lowercase();
        if model.contains("t31") {
            Some(HubChild::T31(T31Device { core, state: None }))
        } else if model.contains("t110") {
            Some(HubChild::T110(T110SmartDoor {
                core,
                state: None,
                tracker: None,
            }))
        } else if model.contains("s200") {
            Some(HubChild::S200B(S200ButtonDevice {
                core,
                state: None,
                tracker: None,
            }))
        } else if model.contains("t100") {
            Some(HubChild::T100(T100MotionSensor {
                core,
                state: None,
                tracker: None,
            }))
        } else if model.contains("ke100") {
            Some(HubChild::Ke100(KE100Device { core, state: None }))
        } else if model.contains("t300") {
            Some(HubChild::T300(WaterLeakSensor { core, state: None }))
        } else if model.contains("s210") || model.contains("s220") {
            Some(HubChild::Switch(SwitchChildDevice { core, state: None }))
        } else {
            None
        }
    }

    pub fn core(&self) -> &HubChildCore {
        match self {
            HubChild::T31(child) => child.core(),
            HubChild::T110(child) => child.core(),
            HubChild::S200B(child) => child.core(),
            HubChild::T100(child) => child.core(),
            HubChild::Ke100(child) => child.core(),
            HubChild::T300(child) => child.core(),
            HubChild::Switch(child) => child.core(),
        }
    }

    pub fn device_id(&self) -> &str {
        self.core().device_id()
    }

    pub fn model(&self) -> &str {
        self.core().model()
    }

    pub async fn update(&mut self) -> Result<(), TapoError> {
        match self {
            HubChild::T31(child) => child.update().await,
            HubChild::T110(child) => child.update().await,
            HubChild::S200B(child) => child.update().await,
            HubChild::T100(child) => child.update().await,
            HubChild::Ke100(child) => child.update().await,
            HubChild::T300(child) => child.update().await,
            HubChild::Switch(child) => child.update().await,
        }
    }
}
