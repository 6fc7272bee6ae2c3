//! Secure MQTT session over the active transport
//!
//! # Architecture
//!
//! - [`broker`] - the broker client seam ([`BrokerClient`], [`BrokerConnector`])
//! - [`mqtt`] - rumqttc-backed implementation of that seam
//! - [`processor`] - the [`SessionProcessor`] state machine that binds a broker
//!   client to the current transport's secure client and keeps it alive

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::certificates::CertificateError;
use crate::registry::RegistryError;
use crate::transport::{TransportClass, TransportError};

pub mod broker;
pub mod mqtt;
pub mod processor;

pub use broker::{BrokerClient, BrokerConnector, BrokerSettings, InboundMessage};
pub use mqtt::{MqttBroker, MqttConnector};
pub use processor::{RestoreBackoff, SessionProcessor};

/// Broker handshake attempts per connect
pub const MAX_CONNECTION_ATTEMPTS: u8 = 5;
/// Failed connects before the transport is restored
pub const RESTORATION_THRESHOLD: u8 = 10;

/// Where the session is in its bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    AttachingTransport,
    LoadingCerts,
    ConnectingMqtt,
    Connected,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Uninitialized => "UNINITIALIZED",
            SessionPhase::AttachingTransport => "ATTACHING_TRANSPORT",
            SessionPhase::LoadingCerts => "LOADING_CERTS",
            SessionPhase::ConnectingMqtt => "CONNECTING_MQTT",
            SessionPhase::Connected => "CONNECTED",
        };
        f.write_str(name)
    }
}

/// Session timing and escalation settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_connection_attempts: u8,
    pub attempt_delay: Duration,
    pub restoration_threshold: u8,
    /// Period of the keep-alive flag, normally the MQTT keep-alive
    pub keep_alive: Duration,
    /// Pause between stopping a dropped session and re-initializing it
    pub reconnect_pause: Duration,
    pub restore_backoff_initial: Duration,
    pub restore_backoff_max: Duration,
    /// Connect without TLS credentials
    pub insecure: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_connection_attempts: MAX_CONNECTION_ATTEMPTS,
            attempt_delay: Duration::from_millis(500),
            restoration_threshold: RESTORATION_THRESHOLD,
            keep_alive: Duration::from_secs(30),
            reconnect_pause: Duration::from_millis(500),
            restore_backoff_initial: Duration::from_secs(30),
            restore_backoff_max: Duration::from_secs(15 * 60),
            insecure: false,
        }
    }
}

/// Session-layer errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Transport is not connected")]
    TransportDown,

    #[error("{0} transport cannot carry a secure session")]
    NoSecureClient(TransportClass),

    #[error("Certificate loading failed")]
    Certificates(#[from] CertificateError),

    #[error("Unsupported credentials: {0}")]
    UnsupportedCredentials(&'static str),

    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),

    #[error("Broker handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Broker handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Broker connect failed after {0} attempts")]
    AttemptsExhausted(u8),

    #[error("Restore cool-down active for another {0:?}")]
    CoolingDown(Duration),

    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Errors worth retrying on a later pass
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            SessionError::NoSecureClient(_)
                | SessionError::Certificates(_)
                | SessionError::UnsupportedCredentials(_)
                | SessionError::InvalidBroker(_)
                | SessionError::Registry(_)
        )
    }
}
