//! Wired transport for running on a host with an existing network stack
//!
//! There is no radio to drive: the link counts as up while a TCP connection
//! to the broker endpoint can be opened within the probe timeout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::{NetworkTime, Transport, TransportClass, TransportError};
use crate::secure::SecureClient;

#[derive(Debug, Clone)]
pub struct HostSettings {
    /// `host:port` opened to verify connectivity
    pub probe_address: String,
    pub probe_timeout: Duration,
    /// How long a successful probe is trusted before probing again
    pub probe_ttl: Duration,
}

impl HostSettings {
    pub fn new(probe_address: impl Into<String>) -> Self {
        Self {
            probe_address: probe_address.into(),
            probe_timeout: Duration::from_secs(3),
            probe_ttl: Duration::from_secs(5),
        }
    }
}

pub struct HostTransport {
    settings: HostSettings,
    secure: SecureClient,
    powered: bool,
    last_probe: Option<(Instant, bool)>,
    attempts: u32,
}

impl HostTransport {
    pub fn new(settings: HostSettings) -> Self {
        Self {
            settings,
            secure: SecureClient::new(TransportClass::Ethernet),
            powered: false,
            last_probe: None,
            attempts: 0,
        }
    }

    async fn probe(&mut self) -> bool {
        if let Some((at, reachable)) = self.last_probe {
            if at.elapsed() < self.settings.probe_ttl {
                return reachable;
            }
        }

        let address = self.settings.probe_address.as_str();
        let reachable = match timeout(self.settings.probe_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(address, error = %e, "Connectivity probe refused");
                false
            }
            Err(_) => {
                debug!(address, "Connectivity probe timed out");
                false
            }
        };
        self.last_probe = Some((Instant::now(), reachable));
        reachable
    }
}

#[async_trait]
impl Transport for HostTransport {
    fn class(&self) -> TransportClass {
        TransportClass::Ethernet
    }

    async fn init(&mut self) -> Result<(), TransportError> {
        self.on().await?;
        self.connect().await
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.last_probe = None;
        self.attempts += 1;
        if self.powered && self.probe().await {
            self.attempts = 0;
            Ok(())
        } else {
            warn!(address = %self.settings.probe_address, "Host network unreachable");
            Err(TransportError::LinkDown(TransportClass::Ethernet))
        }
    }

    async fn disconnect(&mut self) {
        self.last_probe = None;
    }

    async fn is_connected(&mut self) -> bool {
        self.powered && self.probe().await
    }

    async fn on(&mut self) -> Result<(), TransportError> {
        self.powered = true;
        self.secure.reset();
        Ok(())
    }

    async fn off(&mut self) -> Result<(), TransportError> {
        self.powered = false;
        self.last_probe = None;
        Ok(())
    }

    async fn keep_alive(&mut self, max_retries: u8) -> Result<(), TransportError> {
        for _ in 0..max_retries {
            if self.connect().await.is_ok() {
                return Ok(());
            }
        }
        Err(TransportError::LinkDown(TransportClass::Ethernet))
    }

    async fn maintain(&mut self) -> Result<(), TransportError> {
        if self.is_connected().await {
            Ok(())
        } else {
            self.connect().await
        }
    }

    fn secure_client(&mut self) -> Option<&mut SecureClient> {
        Some(&mut self.secure)
    }

    async fn network_time(&mut self) -> Option<NetworkTime> {
        Some(NetworkTime::utc(Utc::now()))
    }

    async fn power_save(&mut self, _enabled: bool) -> Result<(), TransportError> {
        Ok(())
    }

    async fn restore(&mut self) -> Result<(), TransportError> {
        self.off().await?;
        self.init().await
    }

    fn connection_attempts(&self) -> u32 {
        self.attempts
    }
}
