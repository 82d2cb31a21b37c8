//! Authenticated session protocol core for Tapo smart-home devices.
//!
//! Implements the three incompatible transports this device family speaks
//! (the RSA-bootstrapped passthrough scheme, the seed-derived KLAP scheme and
//! the hub-camera H200 digest scheme) plus transport probing, a typed device
//! layer with component-gated capabilities, and hub child polling.

pub mod client;
pub mod credentials;
pub mod crypto;
pub mod device;
pub mod error;
pub mod factory;
pub mod http;
pub mod poll;
pub mod protocol;
pub mod request;
pub mod response;

pub use client::TapoClient;
pub use credentials::AuthCredential;
pub use device::{TapoBulb, TapoDevice, TapoHub, TapoPlug, TapoPlugStrip};
pub use error::TapoError;
pub use factory::{connect, connect_with_scheme, Device, EncryptionScheme};
pub use http::{AsyncHttp, HttpResponse, HttpTransport};
pub use poll::{EventSubscriptionOptions, PollSubscription, PollTracker};
pub use protocol::{H200Protocol, KlapProtocol, PassthroughProtocol, TapoProtocol};
pub use request::TapoRequest;
pub use response::{Components, DeviceInfo, TapoResponse};
