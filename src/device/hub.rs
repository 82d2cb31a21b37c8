//! Hubs: alarm surface, child enumeration and association tracking.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::client::TapoClient;
use crate::error::TapoError;
use crate::poll::{
    HubConnectedDeviceTracker, HubDeviceEvent, PollSubscription, PollTracker, StateProvider,
};
use crate::request::TapoRequest;
use crate::response::child::HubChildBaseInfo;
use crate::response::AlarmTypeList;

use super::{DeviceCore, DeviceType};

pub mod children;

pub use children::{
    HubChild, HubChildCore, KE100Device, S200ButtonDevice, SwitchChildDevice, T100MotionSensor,
    T110SmartDoor, T31Device, WaterLeakSensor,
};

const ASSOCIATION_POLLING_INTERVAL: Duration = Duration::from_millis(5000);

pub struct TapoHub {
    core: DeviceCore,
    children: Vec<HubChild>,
    association: PollTracker<HashSet<String>, HubDeviceEvent>,
}

impl TapoHub {
    pub(crate) fn new(host: String, port: Option<u16>, client: Arc<TapoClient>) -> Self {
        let provider_client = Arc::clone(&client);
        let provider: StateProvider<HashSet<String>> = Arc::new(move |_last| {
            let client = Arc::clone(&provider_client);
            Box::pin(async move {
                let list = client.get_child_device_list(false).await?;
                Ok(list.device_ids().into_iter().collect())
            })
        });
        Self {
            core: DeviceCore::new(host, port, client, DeviceType::Hub),
            children: Vec::new(),
            association: PollTracker::new(
                provider,
                HubConnectedDeviceTracker,
                ASSOCIATION_POLLING_INTERVAL,
            ),
        }
    }

    /// Refreshes the hub snapshot and, on the first call of a hub that routes
    /// children, enumerates and initializes every known child. Models without
    /// a wrapper are skipped.
    pub async fn update(&mut self) -> Result<(), TapoError> {
        self.core.update().await?;

        if self.core.components()?.has("control_child") && self.children.is_empty() {
            let listing = self.core.client().get_child_device_list(true).await?;
            info!(
                target: "tapo::hub",
                count = listing.sum,
                "initializing hub children"
            );
            let (hw_id, oem_id) = {
                let info = self.core.device_info()?;
                (info.hw_id.clone(), info.oem_id.clone())
            };
            for value in &listing.child_device_list {
                let base = match HubChildBaseInfo::try_from_value(value) {
                    Ok(base) => base,
                    Err(_) => continue,
                };
                match HubChild::from_base(
                    Arc::clone(self.core.client()),
                    &base,
                    hw_id.clone(),
                    oem_id.clone(),
                ) {
                    Some(child) => self.children.push(child),
                    None => {
                        debug!(
                            target: "tapo::hub",
                            model = %base.model,
                            "skipping child with unsupported model"
                        );
                    }
                }
            }
            for child in &mut self.children {
                child.update().await?;
            }
        }
        Ok(())
    }

    pub fn core(&self) -> &DeviceCore {
        &self.core
    }

    pub fn children(&self) -> &[HubChild] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [HubChild] {
        &mut self.children
    }

    /// Subscribes to child association changes; the poller runs only while at
    /// least one subscription is live.
    pub fn subscribe_device_association(
        &self,
        callback: impl Fn(&HubDeviceEvent) + Send + Sync + 'static,
    ) -> PollSubscription {
        self.association.subscribe(callback)
    }

    pub fn stop_tracking(&self) {
        self.association.stop_tracking();
    }

    pub fn has_alarm(&self) -> Result<bool, TapoError> {
        Ok(self.core.components()?.has("alarm"))
    }

    pub fn is_alarm_on(&self) -> Result<bool, TapoError> {
        self.core.state_bool("in_alarm")
    }

    pub async fn turn_alarm_on(&self, params: Option<Value>) -> Result<(), TapoError> {
        if !self.has_alarm()? {
            return Err(TapoError::Unsupported("alarm"));
        }
        self.core
            .client()
            .execute_for_result(&TapoRequest::play_alarm(params))
            .await
            .map(|_| ())
    }

    pub async fn turn_alarm_off(&self) -> Result<(), TapoError> {
        if !self.has_alarm()? {
            return Err(TapoError::Unsupported("alarm"));
        }
        self.core
            .client()
            .execute_for_result(&TapoRequest::stop_alarm())
            .await
            .map(|_| ())
    }

    pub async fn get_supported_alarm_tones(&self) -> Result<AlarmTypeList, TapoError> {
        if !self.has_alarm()? {
            return Err(TapoError::Unsupported("alarm"));
        }
        self.core.client().get_supported_alarm_tones().await
    }

    /// Routes a raw request to one of the hub's children.
    pub async fn control_child(
        &self,
        device_id: &str,
        request: TapoRequest,
    ) -> Result<Value, TapoError> {
        self.core.client().control_child(device_id, request).await
    }
}
