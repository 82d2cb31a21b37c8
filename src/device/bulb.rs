//! Bulbs and led strips.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::TapoClient;
use crate::error::TapoError;

use super::{DeviceCore, DeviceType};

const DEFAULT_COLOR_TEMP_RANGE: (i32, i32) = (2500, 6500);

/// Hue/saturation pair as the firmware reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HS {
    pub hue: i32,
    pub saturation: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LightState {
    #[serde(default)]
    device_on: bool,
    #[serde(default)]
    brightness: Option<i32>,
    #[serde(default)]
    hue: Option<i32>,
    #[serde(default)]
    saturation: Option<i32>,
    #[serde(default)]
    color_temp: Option<i32>,
    #[serde(default)]
    color_temp_range: Option<(i32, i32)>,
    #[serde(default)]
    lighting_effect: Option<Value>,
}

pub struct TapoBulb {
    core: DeviceCore,
    light: Option<LightState>,
}

impl TapoBulb {
    pub(crate) fn new(host: String, port: Option<u16>, client: Arc<TapoClient>) -> Self {
        Self {
            core: DeviceCore::new(host, port, client, DeviceType::Bulb),
            light: None,
        }
    }

    pub async fn update(&mut self) -> Result<(), TapoError> {
        self.core.update().await?;
        let state = &self.core.snapshot()?.state;
        self.light = Some(
            serde_json::from_value(state.clone())
                .map_err(|e| TapoError::Protocol(format!("malformed light state: {e}")))?,
        );
        Ok(())
    }

    pub fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn light(&self) -> Result<&LightState, TapoError> {
        self.light.as_ref().ok_or(TapoError::NeedsUpdate)
    }

    pub fn is_on(&self) -> Result<bool, TapoError> {
        Ok(self.light()?.device_on)
    }

    pub fn is_color(&self) -> Result<bool, TapoError> {
        Ok(self.core.components()?.has("color"))
    }

    pub fn is_color_temperature(&self) -> Result<bool, TapoError> {
        Ok(self.core.components()?.has("color_temperature"))
    }

    pub fn is_led_strip(&self) -> Result<bool, TapoError> {
        Ok(self.core.components()?.has("light_strip"))
    }

    pub fn has_effect(&self) -> Result<bool, TapoError> {
        Ok(self
            .core
            .components()?
            .has("light_strip_lighting_effect"))
    }

    pub fn color_temp_range(&self) -> Result<(i32, i32), TapoError> {
        Ok(self
            .light()?
            .color_temp_range
            .unwrap_or(DEFAULT_COLOR_TEMP_RANGE))
    }

    pub fn color_temp(&self) -> Result<Option<i32>, TapoError> {
        Ok(self.light()?.color_temp)
    }

    pub fn hs(&self) -> Result<Option<HS>, TapoError> {
        let light = self.light()?;
        Ok(match (light.hue, light.saturation) {
            (Some(hue), Some(saturation)) => Some(HS { hue, saturation }),
            _ => None,
        })
    }

    pub fn effect(&self) -> Result<Option<&Value>, TapoError> {
        if self.has_effect()? {
            Ok(self.light()?.lighting_effect.as_ref())
        } else {
            Ok(None)
        }
    }

    /// Brightness of the active effect when one is running, otherwise of the
    /// light itself.
    pub fn brightness(&self) -> Result<Option<i32>, TapoError> {
        if let Some(effect) = self.effect()? {
            if effect.get("enable").and_then(Value::as_i64).unwrap_or(0) != 0 {
                return Ok(effect
                    .get("brightness")
                    .and_then(Value::as_i64)
                    .map(|b| b as i32));
            }
        }
        Ok(self.light()?.brightness)
    }

    pub async fn set_brightness(&self, brightness: i32) -> Result<(), TapoError> {
        self.core
            .client()
            .set_device_info(json!({ "brightness": brightness }))
            .await
    }

    pub async fn set_hue_saturation(&self, hue: i32, saturation: i32) -> Result<(), TapoError> {
        self.core
            .client()
            .set_device_info(json!({
                "hue": hue,
                "saturation": saturation,
                "color_temp": 0,
            }))
            .await
    }

    pub async fn set_color_temperature(&self, color_temp: i32) -> Result<(), TapoError> {
        self.core
            .client()
            .set_device_info(json!({ "color_temp": color_temp }))
            .await
    }

    pub async fn set_light_effect(&self, effect: Value) -> Result<(), TapoError> {
        if !self.has_effect()? {
            return Err(TapoError::Unsupported("light_strip_lighting_effect"));
        }
        self.core.client().set_lighting_effect(effect).await
    }

    pub async fn set_light_effect_brightness(
        &self,
        mut effect: Value,
        brightness: i32,
    ) -> Result<(), TapoError> {
        if !self.has_effect()? {
            return Err(TapoError::Unsupported("light_strip_lighting_effect"));
        }
        if let Some(map) = effect.as_object_mut() {
            map.insert("brightness".into(), json!(brightness));
            map.insert("bAdjusted".into(), json!(1));
            map.insert("enable".into(), json!(1));
        }
        self.core.client().set_lighting_effect(effect).await
    }

    pub async fn turn_on(&self) -> Result<(), TapoError> {
        self.core.set_device_on(true).await
    }

    pub async fn turn_off(&self) -> Result<(), TapoError> {
        self.core.set_device_on(false).await
    }
}
