//! Bluetooth serial gateway transport
//!
//! The device advertises a serial service and counts as connected while a
//! gateway client is attached. It cannot carry a TLS session of its own.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info};

use super::{NetworkTime, Transport, TransportClass, TransportError};
use crate::secure::SecureClient;

/// Bluetooth serial-port-profile driver
#[async_trait]
pub trait BluetoothSerial: Send {
    async fn begin(&mut self, name: &str) -> Result<(), TransportError>;

    async fn has_client(&mut self) -> bool;

    async fn end(&mut self);
}

#[derive(Debug, Clone)]
pub struct BluetoothSettings {
    /// Advertised device name
    pub name: String,
    pub keep_alive_delay: Duration,
}

impl Default for BluetoothSettings {
    fn default() -> Self {
        Self {
            name: "devicelink".to_string(),
            keep_alive_delay: Duration::from_secs(1),
        }
    }
}

pub struct BluetoothTransport {
    serial: Box<dyn BluetoothSerial>,
    settings: BluetoothSettings,
    started: bool,
    attempts: u32,
}

impl BluetoothTransport {
    pub fn new(serial: Box<dyn BluetoothSerial>, settings: BluetoothSettings) -> Self {
        Self {
            serial,
            settings,
            started: false,
            attempts: 0,
        }
    }
}

#[async_trait]
impl Transport for BluetoothTransport {
    fn class(&self) -> TransportClass {
        TransportClass::Bluetooth
    }

    async fn init(&mut self) -> Result<(), TransportError> {
        self.on().await?;
        self.connect().await
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.attempts += 1;
        if self.started && self.serial.has_client().await {
            debug!("Bluetooth gateway attached");
            self.attempts = 0;
            Ok(())
        } else {
            Err(TransportError::LinkDown(TransportClass::Bluetooth))
        }
    }

    async fn disconnect(&mut self) {}

    async fn is_connected(&mut self) -> bool {
        self.started && self.serial.has_client().await
    }

    async fn on(&mut self) -> Result<(), TransportError> {
        if !self.started {
            self.serial.begin(&self.settings.name).await?;
            info!(name = %self.settings.name, "Bluetooth serial service started");
            self.started = true;
        }
        Ok(())
    }

    async fn off(&mut self) -> Result<(), TransportError> {
        if self.started {
            self.serial.end().await;
            self.started = false;
        }
        Ok(())
    }

    async fn keep_alive(&mut self, max_retries: u8) -> Result<(), TransportError> {
        for attempt in 0..max_retries {
            if attempt > 0 {
                sleep(self.settings.keep_alive_delay).await;
            }
            if self.connect().await.is_ok() {
                return Ok(());
            }
        }
        Err(TransportError::LinkDown(TransportClass::Bluetooth))
    }

    async fn maintain(&mut self) -> Result<(), TransportError> {
        self.connect().await
    }

    fn secure_client(&mut self) -> Option<&mut SecureClient> {
        None
    }

    async fn network_time(&mut self) -> Option<NetworkTime> {
        None
    }

    async fn power_save(&mut self, _enabled: bool) -> Result<(), TransportError> {
        Ok(())
    }

    async fn restore(&mut self) -> Result<(), TransportError> {
        self.off().await?;
        self.on().await
    }

    fn connection_attempts(&self) -> u32 {
        self.attempts
    }
}
