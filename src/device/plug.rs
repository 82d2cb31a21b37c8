//! Single-socket smart plugs.

use std::sync::Arc;

use crate::client::TapoClient;
use crate::error::TapoError;
use crate::response::{DeviceUsageInfo, EnergyInfo, PowerInfo};

use super::{DeviceCore, DeviceType};

pub struct TapoPlug {
    core: DeviceCore,
    energy: Option<EnergyInfo>,
    power: Option<PowerInfo>,
}

impl TapoPlug {
    pub(crate) fn new(host: String, port: Option<u16>, client: Arc<TapoClient>) -> Self {
        Self {
            core: DeviceCore::new(host, port, client, DeviceType::Plug),
            energy: None,
            power: None,
        }
    }

    /// Refreshes the snapshot; metering extras are fetched when the firmware
    /// declares `energy_monitoring` and tolerated as absent when they fail.
    pub async fn update(&mut self) -> Result<(), TapoError> {
        self.core.update().await?;
        if self.core.components()?.has("energy_monitoring") {
            self.energy = self.core.client().get_energy_usage().await.ok();
            self.power = self.core.client().get_current_power().await.ok();
        }
        Ok(())
    }

    pub fn core(&self) -> &DeviceCore {
        &self.core
    }

    pub fn is_on(&self) -> Result<bool, TapoError> {
        self.core.state_bool("device_on")
    }

    pub async fn turn_on(&self) -> Result<(), TapoError> {
        self.core.set_device_on(true).await
    }

    pub async fn turn_off(&self) -> Result<(), TapoError> {
        self.core.set_device_on(false).await
    }

    pub fn energy_info(&self) -> Result<Option<&EnergyInfo>, TapoError> {
        self.core.snapshot()?;
        Ok(self.energy.as_ref())
    }

    pub fn power_info(&self) -> Result<Option<&PowerInfo>, TapoError> {
        self.core.snapshot()?;
        Ok(self.power.as_ref())
    }

    pub async fn get_device_usage(&self) -> Result<DeviceUsageInfo, TapoError> {
        self.core.client().get_device_usage().await
    }
}
