//! Typed devices over the protocol core.
//!
//! Every device keeps one cached snapshot (`device_info` + `components` +
//! raw state) that `update()` replaces atomically. Accessors never touch the
//! network; before the first `update()` they fail with `NeedsUpdate`.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::client::TapoClient;
use crate::error::TapoError;
use crate::response::{Components, DeviceInfo};

pub mod bulb;
pub mod hub;
pub mod plug;
pub mod strip;

pub use bulb::TapoBulb;
pub use hub::TapoHub;
pub use plug::TapoPlug;
pub use strip::{TapoPlugStrip, TapoStripSocket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Plug,
    PlugStrip,
    Bulb,
    Hub,
    Sensor,
    Unknown,
}

/// One coherent view of a device, replaced wholesale by `update()`.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub device_info: DeviceInfo,
    pub components: Components,
    pub state: Value,
}

/// Cache and accessor plumbing shared by every device kind.
pub struct DeviceCore {
    pub host: String,
    pub port: Option<u16>,
    client: Arc<TapoClient>,
    device_type: DeviceType,
    last_update: Option<DeviceState>,
}

impl DeviceCore {
    pub(crate) fn new(
        host: String,
        port: Option<u16>,
        client: Arc<TapoClient>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            host,
            port,
            client,
            device_type,
            last_update: None,
        }
    }

    pub(crate) fn client(&self) -> &Arc<TapoClient> {
        &self.client
    }

    /// First call negotiates components then fetches device info; later calls
    /// fetch device info only (components are immutable per firmware).
    pub(crate) async fn update(&mut self) -> Result<(), TapoError> {
        let components = match &self.last_update {
            Some(state) => state.components.clone(),
            None => {
                debug!(target: "tapo::device", host = %self.host, "first update, negotiating components");
                self.client.get_component_negotiation().await?
            }
        };
        let state = self.client.get_device_info().await?;
        let device_info = DeviceInfo::try_from_value(&state)?;
        self.last_update = Some(DeviceState {
            device_info,
            components,
            state,
        });
        Ok(())
    }

    /// Re-runs component negotiation on demand (e.g. after a firmware
    /// upgrade); device info is refreshed along with it.
    pub async fn refresh_capabilities(&mut self) -> Result<(), TapoError> {
        let components = self.client.get_component_negotiation().await?;
        match self.last_update.as_mut() {
            Some(state) => {
                state.components = components;
                Ok(())
            }
            None => self.update().await,
        }
    }

    pub(crate) fn snapshot(&self) -> Result<&DeviceState, TapoError> {
        self.last_update.as_ref().ok_or(TapoError::NeedsUpdate)
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn device_info(&self) -> Result<&DeviceInfo, TapoError> {
        Ok(&self.snapshot()?.device_info)
    }

    pub fn components(&self) -> Result<&Components, TapoError> {
        Ok(&self.snapshot()?.components)
    }

    pub fn nickname(&self) -> Result<String, TapoError> {
        Ok(self.snapshot()?.device_info.nickname())
    }

    pub fn mac(&self) -> Result<&str, TapoError> {
        Ok(&self.snapshot()?.device_info.mac)
    }

    pub fn model(&self) -> Result<&str, TapoError> {
        Ok(&self.snapshot()?.device_info.model)
    }

    pub fn device_id(&self) -> Result<&str, TapoError> {
        Ok(&self.snapshot()?.device_info.device_id)
    }

    pub fn overheated(&self) -> Result<bool, TapoError> {
        Ok(self.snapshot()?.device_info.overheated)
    }

    pub fn rssi(&self) -> Result<i32, TapoError> {
        Ok(self.snapshot()?.device_info.rssi)
    }

    pub fn signal_level(&self) -> Result<i32, TapoError> {
        Ok(self.snapshot()?.device_info.signal_level)
    }

    pub fn firmware_version(&self) -> Result<&str, TapoError> {
        Ok(&self.snapshot()?.device_info.fw_ver)
    }

    pub fn hardware_version(&self) -> Result<&str, TapoError> {
        Ok(&self.snapshot()?.device_info.hw_ver)
    }

    pub(crate) async fn set_device_on(&self, on: bool) -> Result<(), TapoError> {
        self.client.set_device_info(json!({ "device_on": on })).await
    }

    pub(crate) fn state_bool(&self, key: &str) -> Result<bool, TapoError> {
        Ok(self
            .snapshot()?
            .state
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

/// Fallback device used when the reported type has no dedicated wrapper.
pub struct TapoDevice {
    core: DeviceCore,
}

impl TapoDevice {
    pub(crate) fn new(host: String, port: Option<u16>, client: Arc<TapoClient>) -> Self {
        Self {
            core: DeviceCore::new(host, port, client, DeviceType::Unknown),
        }
    }

    pub async fn update(&mut self) -> Result<(), TapoError> {
        self.core.update().await
    }

    pub fn core(&self) -> &DeviceCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    /// Raw state payload for callers that know their device variant.
    pub fn state(&self) -> Result<&Value, TapoError> {
        Ok(&self.core.snapshot()?.state)
    }

    pub async fn set_device_info(&self, params: Value) -> Result<(), TapoError> {
        self.core.client().set_device_info(params).await
    }
}
