//! Multi-socket power strips (P300 family).
//!
//! The strip itself is a regular device; each socket is a child addressed
//! through `control_child`, with its own lazily-negotiated component set.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::client::TapoClient;
use crate::error::TapoError;
use crate::request::TapoRequest;
use crate::response::{Components, DeviceInfo};

use super::{DeviceCore, DeviceType};

pub struct TapoPlugStrip {
    core: DeviceCore,
    sockets: Vec<TapoStripSocket>,
}

impl TapoPlugStrip {
    pub(crate) fn new(host: String, port: Option<u16>, client: Arc<TapoClient>) -> Self {
        Self {
            core: DeviceCore::new(host, port, client, DeviceType::PlugStrip),
            sockets: Vec::new(),
        }
    }

    pub async fn update(&mut self) -> Result<(), TapoError> {
        self.core.update().await?;
        if self.core.components()?.has("control_child") && self.sockets.is_empty() {
            let children = self.core.client().get_child_device_list(true).await?;
            info!(
                target: "tapo::strip",
                count = children.sum,
                "initializing strip sockets"
            );
            for device_id in children.device_ids() {
                let mut socket =
                    TapoStripSocket::new(Arc::clone(self.core.client()), device_id);
                socket.update().await?;
                self.sockets.push(socket);
            }
        }
        Ok(())
    }

    pub fn core(&self) -> &DeviceCore {
        &self.core
    }

    pub fn sockets(&self) -> &[TapoStripSocket] {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut [TapoStripSocket] {
        &mut self.sockets
    }
}

struct SocketSnapshot {
    device_info: DeviceInfo,
    components: Components,
    state: Value,
}

pub struct TapoStripSocket {
    client: Arc<TapoClient>,
    child_id: String,
    last_update: Option<SocketSnapshot>,
}

impl TapoStripSocket {
    fn new(client: Arc<TapoClient>, child_id: String) -> Self {
        Self {
            client,
            child_id,
            last_update: None,
        }
    }

    /// Fetches socket state through the strip; components are negotiated the
    /// first time only.
    pub async fn update(&mut self) -> Result<(), TapoError> {
        let components = match &self.last_update {
            Some(snapshot) => snapshot.components.clone(),
            None => {
                let value = self
                    .client
                    .control_child(&self.child_id, TapoRequest::component_negotiation())
                    .await?;
                Components::try_from_value(&value)
            }
        };
        let state = self
            .client
            .control_child(&self.child_id, TapoRequest::get_device_info())
            .await?;
        let mut device_info = DeviceInfo::try_from_value(&state)?;
        // Sockets report an overheat_status string instead of the flag.
        device_info.overheated = state
            .get("overheat_status")
            .and_then(Value::as_str)
            .is_some_and(|status| status != "normal");
        self.last_update = Some(SocketSnapshot {
            device_info,
            components,
            state,
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<&SocketSnapshot, TapoError> {
        self.last_update.as_ref().ok_or(TapoError::NeedsUpdate)
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

    pub fn is_on(&self) -> Result<bool, TapoError> {
        Ok(self
            .snapshot()?
            .state
            .get("device_on")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Device id of the strip this socket belongs to.
    pub fn parent_device_id(&self) -> Result<Option<&str>, TapoError> {
        Ok(self
            .snapshot()?
            .state
            .get("original_device_id")
            .and_then(Value::as_str))
    }

    pub async fn turn_on(&self) -> Result<(), TapoError> {
        self.set_on(true).await
    }

    pub async fn turn_off(&self) -> Result<(), TapoError> {
        self.set_on(false).await
    }

    async fn set_on(&self, on: bool) -> Result<(), TapoError> {
        self.client
            .control_child(
                &self.child_id,
                TapoRequest::set_device_info(json!({ "device_on": on })),
            )
            .await
            .map(|_| ())
    }
}
