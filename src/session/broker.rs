//! Broker client seam
//!
//! The session processor talks to the MQTT broker only through these traits,
//! so the rumqttc binding can be swapped for a recording mock in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::SessionError;
use crate::secure::SecureClient;

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Broker endpoint and MQTT session parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_session: bool,
    /// Capacity of the inbound message queue
    pub inbound_capacity: usize,
}

impl BrokerSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            username: None,
            password: None,
            clean_session: true,
            inbound_capacity: 64,
        }
    }
}

/// A broker session bound to one secure client
#[async_trait]
pub trait BrokerClient: Send {
    /// Perform the MQTT handshake; succeeds once the broker acknowledges
    async fn connect(&mut self) -> Result<(), SessionError>;

    fn is_connected(&self) -> bool;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    /// Take every message received since the last call
    fn drain_inbound(&mut self) -> Vec<InboundMessage>;

    async fn disconnect(&mut self);
}

/// Creates broker clients bound to a transport's TLS settings
pub trait BrokerConnector: Send + Sync {
    fn bind(
        &self,
        secure: &SecureClient,
        settings: &BrokerSettings,
    ) -> Result<Box<dyn BrokerClient>, SessionError>;
}
