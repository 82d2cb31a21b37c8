//! Transport probing and typed-device dispatch.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::client::TapoClient;
use crate::credentials::AuthCredential;
use crate::device::{TapoBulb, TapoDevice, TapoHub, TapoPlug, TapoPlugStrip};
use crate::error::TapoError;
use crate::http::HttpTransport;
use crate::protocol::{KlapProtocol, PassthroughProtocol, TapoProtocol, ERROR_WRONG_TRANSPORT};
use crate::request::TapoRequest;
use crate::response::DeviceInfo;

/// Device kinds the factory can hand back.
pub enum Device {
    Plug(TapoPlug),
    PlugStrip(TapoPlugStrip),
    Bulb(TapoBulb),
    Hub(TapoHub),
    Generic(TapoDevice),
}

impl Device {
    pub async fn update(&mut self) -> Result<(), TapoError> {
        match self {
            Device::Plug(device) => device.update().await,
            Device::PlugStrip(device) => device.update().await,
            Device::Bulb(device) => device.update().await,
            Device::Hub(device) => device.update().await,
            Device::Generic(device) => device.update().await,
        }
    }

    pub fn core(&self) -> &crate::device::DeviceCore {
        match self {
            Device::Plug(device) => device.core(),
            Device::PlugStrip(device) => device.core(),
            Device::Bulb(device) => device.core(),
            Device::Hub(device) => device.core(),
            Device::Generic(device) => device.core(),
        }
    }
}

/// Encryption scheme advertised by discovery payloads
/// (`mgt_encrypt_schm.encrypt_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionScheme {
    Klap,
    Aes,
}

impl EncryptionScheme {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "klap" => Some(EncryptionScheme::Klap),
            "aes" => Some(EncryptionScheme::Aes),
            _ => None,
        }
    }
}

pub fn device_url(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("http://{host}:{port}/app"),
        None => format!("http://{host}/app"),
    }
}

/// Connects by probing: passthrough first, then KLAP when the device answers
/// the probe with the wrong-transport code.
pub async fn connect(
    host: &str,
    port: Option<u16>,
    credential: AuthCredential,
    http: Arc<dyn HttpTransport>,
) -> Result<Device, TapoError> {
    let url = device_url(host, port);
    let probe = TapoRequest::get_device_info();
    let mut protocol = TapoProtocol::Passthrough(PassthroughProtocol::new(
        credential.clone(),
        url.clone(),
        Arc::clone(&http),
    ));
    let info = match protocol.send_request(&probe).await.and_then(|r| r.into_result()) {
        Ok(info) => info,
        Err(err) if err.error_code() == Some(ERROR_WRONG_TRANSPORT) => {
            warn!(target: "tapo::factory", host, "default transport refused, falling back to KLAP");
            protocol = TapoProtocol::Klap(KlapProtocol::new(credential, url, http));
            protocol.send_request(&probe).await?.into_result()?
        }
        Err(err) => return Err(err),
    };
    dispatch(host, port, protocol, &info)
}

/// Connects with a scheme already known from discovery, skipping the probe.
pub async fn connect_with_scheme(
    scheme: EncryptionScheme,
    host: &str,
    port: Option<u16>,
    credential: AuthCredential,
    http: Arc<dyn HttpTransport>,
) -> Result<Device, TapoError> {
    let url = device_url(host, port);
    let mut protocol = match scheme {
        EncryptionScheme::Klap => TapoProtocol::Klap(KlapProtocol::new(credential, url, http)),
        EncryptionScheme::Aes => {
            TapoProtocol::Passthrough(PassthroughProtocol::new(credential, url, http))
        }
    };
    let info = protocol
        .send_request(&TapoRequest::get_device_info())
        .await?
        .into_result()?;
    dispatch(host, port, protocol, &info)
}

fn dispatch(
    host: &str,
    port: Option<u16>,
    protocol: TapoProtocol,
    info: &Value,
) -> Result<Device, TapoError> {
    let info = DeviceInfo::try_from_value(info)?;
    let client = Arc::new(TapoClient::new(protocol));
    let host = host.to_string();
    let device = match info.device_type.to_uppercase().as_str() {
        "SMART.TAPOPLUG" if info.model.to_lowercase().contains("p300") => {
            Device::PlugStrip(TapoPlugStrip::new(host, port, client))
        }
        "SMART.TAPOPLUG" => Device::Plug(TapoPlug::new(host, port, client)),
        "SMART.TAPOBULB" => Device::Bulb(TapoBulb::new(host, port, client)),
        "SMART.TAPOHUB" => Device::Hub(TapoHub::new(host, port, client)),
        _ => Device::Generic(TapoDevice::new(host, port, client)),
    };
    Ok(device)
}
