//! Physical connectivity layer
//!
//! A [`Transport`] is one way of getting the device onto an IP network (Wi-Fi,
//! cellular, Bluetooth gateway, or a wired host interface). The
//! [`TransportManager`](manager::TransportManager) owns every configured
//! transport as a [`Link`] and fails over between them by preference.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secure::SecureClient;

pub mod bluetooth;
pub mod cellular;
pub mod host;
pub mod manager;
pub mod wifi;

pub use bluetooth::{BluetoothSerial, BluetoothSettings, BluetoothTransport};
pub use cellular::{CellularSettings, CellularTransport, Modem};
pub use host::{HostSettings, HostTransport};
pub use manager::TransportManager;
pub use wifi::{KnownNetwork, NetworkStore, WifiRadio, WifiSettings, WifiTransport};

/// Connection class reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportClass {
    Wifi,
    Cellular,
    Bluetooth,
    Ethernet,
    #[default]
    None,
}

impl fmt::Display for TransportClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportClass::Wifi => "WIFI",
            TransportClass::Cellular => "CELLULAR",
            TransportClass::Bluetooth => "BLUETOOTH",
            TransportClass::Ethernet => "ETHERNET",
            TransportClass::None => "NONE",
        };
        f.write_str(name)
    }
}

/// Which transports the manager may use, and in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPreference {
    #[default]
    WifiPreferred,
    CellularPreferred,
    WifiOnly,
    CellularOnly,
}

impl ConnectionPreference {
    /// Rank of a transport class under this preference, lower first.
    ///
    /// `None` means the class is excluded entirely. Classes the preference does
    /// not name (Bluetooth, Ethernet) rank after the named radios unless the
    /// preference is one of the `*_ONLY` policies.
    pub fn rank(&self, class: TransportClass) -> Option<usize> {
        match (self, class) {
            (_, TransportClass::None) => None,
            (ConnectionPreference::WifiPreferred, TransportClass::Wifi) => Some(0),
            (ConnectionPreference::WifiPreferred, TransportClass::Cellular) => Some(1),
            (ConnectionPreference::CellularPreferred, TransportClass::Cellular) => Some(0),
            (ConnectionPreference::CellularPreferred, TransportClass::Wifi) => Some(1),
            (ConnectionPreference::WifiPreferred | ConnectionPreference::CellularPreferred, _) => {
                Some(2)
            }
            (ConnectionPreference::WifiOnly, TransportClass::Wifi) => Some(0),
            (ConnectionPreference::CellularOnly, TransportClass::Cellular) => Some(0),
            _ => None,
        }
    }
}

/// Wall-clock time reported by the network a transport is attached to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkTime {
    pub utc: DateTime<Utc>,
    /// Offset of the network's local time zone, in hours
    pub timezone_hours: f32,
}

impl NetworkTime {
    pub fn utc(utc: DateTime<Utc>) -> Self {
        Self {
            utc,
            timezone_hours: 0.0,
        }
    }
}

/// Errors raised by transports and their drivers
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0} link is down")]
    LinkDown(TransportClass),

    #[error("{class} radio did not respond within {timeout_ms}ms")]
    RadioUnresponsive { class: TransportClass, timeout_ms: u64 },

    #[error("No known Wi-Fi networks configured")]
    NoKnownNetworks,

    #[error("Known network limit of {0} reached")]
    NetworkLimit(usize),

    #[error("Network store error: {0}")]
    NetworkStore(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Operation not supported by {0} transport")]
    Unsupported(TransportClass),

    #[error("No transport is active")]
    NoActiveTransport,

    #[error("All transports failed to connect")]
    AllTransportsFailed,
}

/// One physical connectivity method
///
/// Implementations are constructed once at boot and then powered on and off
/// many times. `connect` only succeeds once link-level connectivity has been
/// verified; `init` is power-on followed by the first connect.
#[async_trait]
pub trait Transport: Send {
    fn class(&self) -> TransportClass;

    async fn init(&mut self) -> Result<(), TransportError>;

    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn disconnect(&mut self);

    async fn is_connected(&mut self) -> bool;

    async fn on(&mut self) -> Result<(), TransportError>;

    async fn off(&mut self) -> Result<(), TransportError>;

    /// Retry `connect` up to `max_retries` times while the link is down
    async fn keep_alive(&mut self, max_retries: u8) -> Result<(), TransportError>;

    /// Bounded health probe that tries to bring a dropped link back
    async fn maintain(&mut self) -> Result<(), TransportError>;

    /// TLS settings bound to this transport, if it can carry a secure session
    fn secure_client(&mut self) -> Option<&mut SecureClient>;

    async fn network_time(&mut self) -> Option<NetworkTime>;

    async fn power_save(&mut self, enabled: bool) -> Result<(), TransportError>;

    /// Heavy recovery: reload the underlying radio from scratch
    async fn restore(&mut self) -> Result<(), TransportError>;

    /// Consecutive connection attempts since the last success
    fn connection_attempts(&self) -> u32;
}

/// A transport owned by the manager
pub enum Link {
    Wifi(WifiTransport),
    Cellular(CellularTransport),
    Bluetooth(BluetoothTransport),
    Host(HostTransport),
    External(Box<dyn Transport>),
}

macro_rules! each_link {
    ($link:expr, $t:ident => $body:expr) => {
        match $link {
            Link::Wifi($t) => $body,
            Link::Cellular($t) => $body,
            Link::Bluetooth($t) => $body,
            Link::Host($t) => $body,
            Link::External($t) => $body,
        }
    };
}

impl Link {
    pub fn as_wifi_mut(&mut self) -> Option<&mut WifiTransport> {
        match self {
            Link::Wifi(wifi) => Some(wifi),
            _ => None,
        }
    }

    pub fn as_cellular_mut(&mut self) -> Option<&mut CellularTransport> {
        match self {
            Link::Cellular(cellular) => Some(cellular),
            _ => None,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Link::Wifi(_) => "Wifi",
            Link::Cellular(_) => "Cellular",
            Link::Bluetooth(_) => "Bluetooth",
            Link::Host(_) => "Host",
            Link::External(_) => "External",
        };
        f.debug_struct("Link")
            .field("kind", &kind)
            .field("class", &self.class())
            .finish()
    }
}

#[async_trait]
impl Transport for Link {
    fn class(&self) -> TransportClass {
        each_link!(self, t => t.class())
    }

    async fn init(&mut self) -> Result<(), TransportError> {
        each_link!(self, t => t.init().await)
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        each_link!(self, t => t.connect().await)
    }

    async fn disconnect(&mut self) {
        each_link!(self, t => t.disconnect().await)
    }

    async fn is_connected(&mut self) -> bool {
        each_link!(self, t => t.is_connected().await)
    }

    async fn on(&mut self) -> Result<(), TransportError> {
        each_link!(self, t => t.on().await)
    }

    async fn off(&mut self) -> Result<(), TransportError> {
        each_link!(self, t => t.off().await)
    }

    async fn keep_alive(&mut self, max_retries: u8) -> Result<(), TransportError> {
        each_link!(self, t => t.keep_alive(max_retries).await)
    }

    async fn maintain(&mut self) -> Result<(), TransportError> {
        each_link!(self, t => t.maintain().await)
    }

    fn secure_client(&mut self) -> Option<&mut SecureClient> {
        each_link!(self, t => t.secure_client())
    }

    async fn network_time(&mut self) -> Option<NetworkTime> {
        each_link!(self, t => t.network_time().await)
    }

    async fn power_save(&mut self, enabled: bool) -> Result<(), TransportError> {
        each_link!(self, t => t.power_save(enabled).await)
    }

    async fn restore(&mut self) -> Result<(), TransportError> {
        each_link!(self, t => t.restore().await)
    }

    fn connection_attempts(&self) -> u32 {
        each_link!(self, t => t.connection_attempts())
    }
}
