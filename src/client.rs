//! Typed operation surface over one protocol instance.
//!
//! Sessions are single-owner: the protocol sits behind an async mutex and
//! requests from one client complete in issue order. Separate devices get
//! separate clients and run independently.

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::TapoError;
use crate::request::{GetTriggerLogsParams, TapoRequest};
use crate::response::{
    AlarmTypeList, ChildDeviceList, Components, DeviceUsageInfo, EnergyInfo, PowerInfo,
    TapoResponse, TimeInfo,
};

pub struct TapoClient {
    protocol: Mutex<crate::protocol::TapoProtocol>,
}

impl TapoClient {
    pub fn new(protocol: crate::protocol::TapoProtocol) -> Self {
        Self {
            protocol: Mutex::new(protocol),
        }
    }

    /// Sends a raw request and returns the envelope untouched.
    pub async fn execute(&self, request: &TapoRequest) -> Result<TapoResponse, TapoError> {
        self.protocol.lock().await.send_request(request).await
    }

    /// Sends a raw request and applies the envelope invariant.
    pub async fn execute_for_result(&self, request: &TapoRequest) -> Result<Value, TapoError> {
        self.execute(request).await?.into_result()
    }

    pub async fn get_device_info(&self) -> Result<Value, TapoError> {
        self.execute_for_result(&TapoRequest::get_device_info())
            .await
    }

    pub async fn get_component_negotiation(&self) -> Result<Components, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::component_negotiation())
            .await?;
        Ok(Components::try_from_value(&result))
    }

    pub async fn set_device_info(&self, params: Value) -> Result<(), TapoError> {
        self.execute_for_result(&TapoRequest::set_device_info(params))
            .await
            .map(|_| ())
    }

    pub async fn get_device_usage(&self) -> Result<DeviceUsageInfo, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::get_device_usage())
            .await?;
        serde_json::from_value(result)
            .map_err(|e| TapoError::Protocol(format!("malformed device usage: {e}")))
    }

    pub async fn get_energy_usage(&self) -> Result<EnergyInfo, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::get_energy_usage())
            .await?;
        serde_json::from_value(result)
            .map_err(|e| TapoError::Protocol(format!("malformed energy usage: {e}")))
    }

    pub async fn get_current_power(&self) -> Result<PowerInfo, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::get_current_power())
            .await?;
        serde_json::from_value(result)
            .map_err(|e| TapoError::Protocol(format!("malformed power info: {e}")))
    }

    pub async fn get_device_time(&self) -> Result<TimeInfo, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::get_device_time())
            .await?;
        serde_json::from_value(result)
            .map_err(|e| TapoError::Protocol(format!("malformed time info: {e}")))
    }

    pub async fn set_lighting_effect(&self, effect: Value) -> Result<(), TapoError> {
        self.execute_for_result(&TapoRequest::set_lighting_effect(effect))
            .await
            .map(|_| ())
    }

    pub async fn get_supported_alarm_tones(&self) -> Result<AlarmTypeList, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::get_support_alarm_type_list())
            .await?;
        serde_json::from_value(result)
            .map_err(|e| TapoError::Protocol(format!("malformed alarm tone list: {e}")))
    }

    /// Fetches the child listing; with `all_pages` the pagination cursor is
    /// followed until `sum` entries are held.
    pub async fn get_child_device_list(
        &self,
        all_pages: bool,
    ) -> Result<ChildDeviceList, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::get_child_device_list(0))
            .await?;
        let mut list = ChildDeviceList::try_from_value(&result)?;
        while all_pages && (list.len() as u64) < list.sum {
            let result = self
                .execute_for_result(&TapoRequest::get_child_device_list(list.len() as u64))
                .await?;
            let page = ChildDeviceList::try_from_value(&result)?;
            if page.is_empty() {
                break;
            }
            list.absorb_page(page);
        }
        Ok(list)
    }

    pub async fn get_child_component_list(&self) -> Result<Value, TapoError> {
        self.execute_for_result(&TapoRequest::get_child_device_component_list())
            .await
    }

    /// Routes `request` to a hub/strip child. The inner request travels as a
    /// single-element batch; the reply is the first nested response.
    pub async fn control_child(
        &self,
        device_id: &str,
        request: TapoRequest,
    ) -> Result<Value, TapoError> {
        let batch = TapoRequest::multiple_request(vec![request]);
        let result = self
            .execute_for_result(&TapoRequest::control_child(device_id, batch))
            .await?;
        let responses = result
            .get("responseData")
            .and_then(|v| v.get("result"))
            .and_then(|v| v.get("responses"))
            .and_then(Value::as_array)
            .ok_or_else(|| TapoError::Protocol("malformed control_child reply".into()))?;
        let first = responses
            .first()
            .ok_or_else(|| TapoError::Protocol("empty control_child reply".into()))?;
        nested_response(first).into_result()
    }

    /// Batches several requests; replies come back in issue order.
    pub async fn multiple_request(
        &self,
        requests: Vec<TapoRequest>,
    ) -> Result<Vec<TapoResponse>, TapoError> {
        let result = self
            .execute_for_result(&TapoRequest::multiple_request(requests))
            .await?;
        let responses = result
            .get("responses")
            .and_then(Value::as_array)
            .ok_or_else(|| TapoError::Protocol("malformed multipleRequest reply".into()))?;
        Ok(responses.iter().map(nested_response).collect())
    }

    pub async fn get_child_event_logs(
        &self,
        device_id: &str,
        page_size: u64,
        start_id: u64,
    ) -> Result<Value, TapoError> {
        self.control_child(
            device_id,
            TapoRequest::get_trigger_logs(GetTriggerLogsParams {
                page_size,
                start_id,
            }),
        )
        .await
    }

    pub async fn get_latest_firmware(&self) -> Result<Value, TapoError> {
        self.execute_for_result(&TapoRequest::get_latest_firmware())
            .await
    }

    pub async fn get_firmware_download_state(&self) -> Result<Value, TapoError> {
        self.execute_for_result(&TapoRequest::get_firmware_download_state())
            .await
    }

    pub async fn start_firmware_upgrade(&self) -> Result<(), TapoError> {
        self.execute_for_result(&TapoRequest::start_firmware_upgrade())
            .await
            .map(|_| ())
    }

    /// Drops session material; the next request re-handshakes.
    pub async fn close(&self) {
        self.protocol.lock().await.close();
    }
}

/// Entries inside batched replies omit `error_code` when they succeed.
fn nested_response(value: &Value) -> TapoResponse {
    TapoResponse {
        error_code: value
            .get("error_code")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32,
        result: value.get("result").cloned(),
        msg: value.get("msg").and_then(Value::as_str).map(str::to_string),
    }
}
