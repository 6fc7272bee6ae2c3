//! Cellular (GPRS/LTE) transport
//!
//! Drives an AT-command modem through [`Modem`]: power up, wait for the modem
//! to answer, unlock the SIM, register on the network, and attach the packet
//! data context with the configured APN.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::{NetworkTime, Transport, TransportClass, TransportError};
use crate::secure::SecureClient;

/// AT-command modem driver
#[async_trait]
pub trait Modem: Send {
    async fn power_on(&mut self) -> Result<(), TransportError>;

    async fn power_off(&mut self);

    /// Send `AT` and wait up to `timeout` for `OK`
    async fn test_at(&mut self, timeout: Duration) -> bool;

    async fn init(&mut self) -> Result<(), TransportError>;

    async fn sim_ready(&mut self) -> bool;

    async fn unlock_sim(&mut self, pin: &str) -> Result<(), TransportError>;

    async fn set_network_mode(&mut self, mode: u8) -> Result<(), TransportError>;

    async fn wait_for_network(&mut self, timeout: Duration) -> bool;

    async fn gprs_connect(
        &mut self,
        apn: &str,
        user: &str,
        password: &str,
    ) -> Result<(), TransportError>;

    async fn gprs_disconnect(&mut self);

    async fn is_network_connected(&mut self) -> bool;

    async fn factory_reset(&mut self) -> Result<(), TransportError>;

    /// `AT+CFUN` level: 0 minimum, 1 full functionality
    async fn set_functionality(&mut self, level: u8) -> Result<(), TransportError>;

    async fn network_time(&mut self) -> Option<NetworkTime>;
}

/// Cellular attach parameters and timing
#[derive(Debug, Clone)]
pub struct CellularSettings {
    pub apn: String,
    pub gprs_user: String,
    pub gprs_password: String,
    pub sim_pin: Option<String>,
    /// Preferred radio access mode passed to the modem
    pub network_mode: u8,
    /// Power-ons without a successful attach before the modem is factory reset
    pub max_connection_attempts: u32,
    pub modem_ready_timeout: Duration,
    pub modem_poll_interval: Duration,
    pub network_timeout: Duration,
    pub registration_checks: u32,
    pub registration_interval: Duration,
    pub reload_pause: Duration,
    pub keep_alive_delay: Duration,
}

impl Default for CellularSettings {
    fn default() -> Self {
        Self {
            apn: String::new(),
            gprs_user: String::new(),
            gprs_password: String::new(),
            sim_pin: None,
            network_mode: 2,
            max_connection_attempts: 5,
            modem_ready_timeout: Duration::from_secs(60),
            modem_poll_interval: Duration::from_secs(1),
            network_timeout: Duration::from_secs(20),
            registration_checks: 10,
            registration_interval: Duration::from_secs(1),
            reload_pause: Duration::from_secs(1),
            keep_alive_delay: Duration::from_secs(1),
        }
    }
}

pub struct CellularTransport {
    modem: Box<dyn Modem>,
    settings: CellularSettings,
    secure: SecureClient,
    connected: bool,
    attempts: u32,
}

impl CellularTransport {
    pub fn new(modem: Box<dyn Modem>, settings: CellularSettings) -> Self {
        Self {
            modem,
            settings,
            secure: SecureClient::new(TransportClass::Cellular),
            connected: false,
            attempts: 0,
        }
    }

    pub fn settings(&self) -> &CellularSettings {
        &self.settings
    }

    /// Change the APN and reload the modem with it
    pub async fn set_apn(&mut self, apn: impl Into<String>) -> Result<(), TransportError> {
        self.settings.apn = apn.into();
        self.reload().await
    }

    /// Change the SIM PIN and reload the modem with it
    pub async fn set_sim_pin(&mut self, pin: Option<String>) -> Result<(), TransportError> {
        self.settings.sim_pin = pin;
        self.reload().await
    }

    async fn reload(&mut self) -> Result<(), TransportError> {
        info!("Reloading cellular modem");
        self.disconnect().await;
        self.off().await?;
        sleep(self.settings.reload_pause).await;
        self.init().await
    }

    async fn wait_for_modem(&mut self) -> bool {
        let deadline = Instant::now() + self.settings.modem_ready_timeout;
        loop {
            if self.modem.test_at(self.settings.modem_poll_interval).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.settings.modem_poll_interval).await;
        }
    }

    async fn init_modem(&mut self) -> Result<(), TransportError> {
        self.attempts += 1;
        debug!(attempt = self.attempts, "Initializing modem");

        if !self.wait_for_modem().await {
            error!("Modem did not answer AT commands");
            return Err(TransportError::RadioUnresponsive {
                class: TransportClass::Cellular,
                timeout_ms: self.settings.modem_ready_timeout.as_millis() as u64,
            });
        }

        if self.attempts >= self.settings.max_connection_attempts {
            warn!(
                attempts = self.attempts,
                "Cellular attempts exhausted, restoring modem factory defaults"
            );
            self.modem.factory_reset().await?;
            self.attempts = 0;
        }

        self.modem.init().await?;

        if let Some(pin) = self.settings.sim_pin.as_deref().filter(|p| !p.is_empty()) {
            if !self.modem.sim_ready().await {
                self.modem.unlock_sim(pin).await?;
            }
        }

        self.modem.set_network_mode(self.settings.network_mode).await
    }
}

#[async_trait]
impl Transport for CellularTransport {
    fn class(&self) -> TransportClass {
        TransportClass::Cellular
    }

    async fn init(&mut self) -> Result<(), TransportError> {
        self.on().await?;
        self.connect().await
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        debug!("Waiting for cellular network");
        if !self.modem.wait_for_network(self.settings.network_timeout).await {
            warn!("Cellular network not found");
            return Err(TransportError::LinkDown(TransportClass::Cellular));
        }

        info!(apn = %self.settings.apn, "Attaching packet data context");
        self.modem
            .gprs_connect(
                &self.settings.apn,
                &self.settings.gprs_user,
                &self.settings.gprs_password,
            )
            .await?;

        for check in 0..self.settings.registration_checks {
            if self.modem.is_network_connected().await {
                info!("Cellular network connected");
                self.connected = true;
                self.attempts = 0;
                return Ok(());
            }
            if check + 1 < self.settings.registration_checks {
                sleep(self.settings.registration_interval).await;
            }
        }

        warn!("Cellular network registration timed out");
        self.connected = false;
        Err(TransportError::LinkDown(TransportClass::Cellular))
    }

    async fn disconnect(&mut self) {
        self.modem.gprs_disconnect().await;
        self.connected = false;
    }

    async fn is_connected(&mut self) -> bool {
        self.connected = self.connected && self.modem.is_network_connected().await;
        self.connected
    }

    async fn on(&mut self) -> Result<(), TransportError> {
        self.modem.power_on().await?;
        self.init_modem().await?;
        self.secure.reset();
        Ok(())
    }

    async fn off(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.modem.power_off().await;
        Ok(())
    }

    async fn keep_alive(&mut self, max_retries: u8) -> Result<(), TransportError> {
        for attempt in 0..max_retries {
            if self.is_connected().await {
                return Ok(());
            }
            if attempt > 0 {
                sleep(self.settings.keep_alive_delay).await;
            }
            if self.connect().await.is_ok() {
                return Ok(());
            }
        }
        Err(TransportError::LinkDown(TransportClass::Cellular))
    }

    async fn maintain(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;
        if !self.modem.test_at(self.settings.modem_poll_interval).await {
            return Err(TransportError::RadioUnresponsive {
                class: TransportClass::Cellular,
                timeout_ms: self.settings.modem_poll_interval.as_millis() as u64,
            });
        }
        self.modem
            .set_network_mode(self.settings.network_mode)
            .await?;
        self.connect().await
    }

    fn secure_client(&mut self) -> Option<&mut SecureClient> {
        Some(&mut self.secure)
    }

    async fn network_time(&mut self) -> Option<NetworkTime> {
        self.modem.network_time().await
    }

    async fn power_save(&mut self, enabled: bool) -> Result<(), TransportError> {
        let level = if enabled { 0 } else { 1 };
        self.modem.set_functionality(level).await
    }

    async fn restore(&mut self) -> Result<(), TransportError> {
        self.reload().await
    }

    fn connection_attempts(&self) -> u32 {
        self.attempts
    }
}
