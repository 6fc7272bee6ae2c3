//! Wi-Fi station transport
//!
//! Connects to the first reachable network from a small persisted list of
//! known networks. The radio itself sits behind [`WifiRadio`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{NetworkTime, Transport, TransportClass, TransportError};
use crate::secure::SecureClient;

/// Maximum number of remembered networks
pub const MAX_KNOWN_NETWORKS: usize = 10;

/// Station-mode Wi-Fi radio driver
#[async_trait]
pub trait WifiRadio: Send {
    async fn set_station_mode(&mut self, enabled: bool) -> Result<(), TransportError>;

    /// Start associating with a network; completion is observed via `is_associated`
    async fn begin(&mut self, ssid: &str, password: &str) -> Result<(), TransportError>;

    async fn is_associated(&mut self) -> bool;

    async fn disconnect(&mut self);

    async fn network_time(&mut self) -> Option<NetworkTime> {
        None
    }

    async fn set_power_save(&mut self, _enabled: bool) -> Result<(), TransportError> {
        Ok(())
    }

    /// Wipe radio state back to defaults
    async fn factory_reset(&mut self) -> Result<(), TransportError> {
        self.set_station_mode(false).await
    }
}

/// SSID and passphrase of a remembered network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownNetwork {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

impl KnownNetwork {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NetworkFile {
    #[serde(default)]
    networks: Vec<KnownNetwork>,
}

/// Bounded list of known networks, optionally backed by a TOML file
#[derive(Debug, Clone, Default)]
pub struct NetworkStore {
    path: Option<PathBuf>,
    networks: Vec<KnownNetwork>,
}

impl NetworkStore {
    /// Store that lives only in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store persisted at `path`; nothing is read until [`load`](Self::load)
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            networks: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the in-memory list with the file contents; a missing file is an empty list
    pub fn load(&mut self) -> Result<(), TransportError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.networks.clear();
                return Ok(());
            }
            Err(e) => return Err(TransportError::NetworkStore(e.to_string())),
        };
        let file: NetworkFile =
            toml::from_str(&content).map_err(|e| TransportError::NetworkStore(e.to_string()))?;
        self.networks = file.networks;
        self.networks.truncate(MAX_KNOWN_NETWORKS);
        Ok(())
    }

    pub fn save(&self) -> Result<(), TransportError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = NetworkFile {
            networks: self.networks.clone(),
        };
        let content =
            toml::to_string(&file).map_err(|e| TransportError::NetworkStore(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| TransportError::NetworkStore(e.to_string()))
    }

    /// Add a network or update the passphrase of an existing one
    pub fn add(&mut self, network: KnownNetwork) -> Result<(), TransportError> {
        if let Some(existing) = self.networks.iter_mut().find(|n| n.ssid == network.ssid) {
            existing.password = network.password;
            return Ok(());
        }
        if self.networks.len() >= MAX_KNOWN_NETWORKS {
            return Err(TransportError::NetworkLimit(MAX_KNOWN_NETWORKS));
        }
        self.networks.push(network);
        Ok(())
    }

    pub fn remove(&mut self, ssid: &str) -> bool {
        let before = self.networks.len();
        self.networks.retain(|n| n.ssid != ssid);
        self.networks.len() != before
    }

    pub fn networks(&self) -> &[KnownNetwork] {
        &self.networks
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Wi-Fi timing and escalation settings
#[derive(Debug, Clone)]
pub struct WifiSettings {
    /// Per-network association timeout
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after every known network failed
    pub retry_pause: Duration,
    pub keep_alive_delay: Duration,
    /// Power-ons without a successful connect before the radio is factory reset
    pub max_connection_attempts: u32,
    /// Added to the store the first time the transport initializes
    pub default_network: Option<KnownNetwork>,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            retry_pause: Duration::from_secs(10),
            keep_alive_delay: Duration::from_secs(1),
            max_connection_attempts: 10,
            default_network: None,
        }
    }
}

pub struct WifiTransport {
    radio: Box<dyn WifiRadio>,
    store: NetworkStore,
    settings: WifiSettings,
    secure: SecureClient,
    store_loaded: bool,
    connected: bool,
    attempts: u32,
}

impl WifiTransport {
    pub fn new(radio: Box<dyn WifiRadio>, store: NetworkStore, settings: WifiSettings) -> Self {
        Self {
            radio,
            store,
            settings,
            secure: SecureClient::new(TransportClass::Wifi),
            store_loaded: false,
            connected: false,
            attempts: 0,
        }
    }

    /// Remember a network and persist the list
    pub fn add_network(
        &mut self,
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), TransportError> {
        self.ensure_store_loaded();
        self.store.add(KnownNetwork::new(ssid, password))?;
        self.store.save()
    }

    pub fn networks(&self) -> &[KnownNetwork] {
        self.store.networks()
    }

    fn ensure_store_loaded(&mut self) {
        if self.store_loaded {
            return;
        }
        if let Err(e) = self.store.load() {
            warn!(error = %e, "Failed to load known Wi-Fi networks");
        }
        if let Some(default) = self.settings.default_network.clone() {
            if let Err(e) = self.store.add(default) {
                warn!(error = %e, "Could not add default Wi-Fi network");
            }
        }
        self.store_loaded = true;
    }

    async fn try_network(&mut self, network: &KnownNetwork) -> bool {
        debug!(ssid = %network.ssid, "Attempting Wi-Fi association");
        if let Err(e) = self.radio.begin(&network.ssid, &network.password).await {
            warn!(ssid = %network.ssid, error = %e, "Wi-Fi radio rejected association request");
            return false;
        }

        let deadline = Instant::now() + self.settings.connect_timeout;
        loop {
            if self.radio.is_associated().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}

#[async_trait]
impl Transport for WifiTransport {
    fn class(&self) -> TransportClass {
        TransportClass::Wifi
    }

    async fn init(&mut self) -> Result<(), TransportError> {
        self.ensure_store_loaded();
        self.on().await?;
        self.connect().await
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected && self.radio.is_associated().await {
            return Ok(());
        }
        self.connected = false;

        if self.store.is_empty() {
            warn!("No known Wi-Fi networks to try");
            return Err(TransportError::NoKnownNetworks);
        }

        let candidates = self.store.networks().to_vec();
        for network in &candidates {
            if self.try_network(network).await {
                info!(ssid = %network.ssid, "Wi-Fi connected");
                self.connected = true;
                self.attempts = 0;
                return Ok(());
            }
            warn!(ssid = %network.ssid, "Wi-Fi association timed out");
            self.radio.disconnect().await;
        }

        warn!(
            pause_ms = self.settings.retry_pause.as_millis() as u64,
            "All known Wi-Fi networks failed"
        );
        sleep(self.settings.retry_pause).await;
        Err(TransportError::LinkDown(TransportClass::Wifi))
    }

    async fn disconnect(&mut self) {
        self.radio.disconnect().await;
        self.connected = false;
    }

    async fn is_connected(&mut self) -> bool {
        self.connected = self.connected && self.radio.is_associated().await;
        self.connected
    }

    async fn on(&mut self) -> Result<(), TransportError> {
        self.attempts += 1;
        if self.attempts >= self.settings.max_connection_attempts {
            warn!(
                attempts = self.attempts,
                "Wi-Fi attempts exhausted, restoring radio defaults"
            );
            self.radio.factory_reset().await?;
            self.attempts = 0;
        }
        self.radio.set_station_mode(true).await?;
        self.secure.reset();
        Ok(())
    }

    async fn off(&mut self) -> Result<(), TransportError> {
        self.radio.disconnect().await;
        self.connected = false;
        self.radio.set_station_mode(false).await
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
        if self.is_connected().await {
            Ok(())
        } else {
            Err(TransportError::LinkDown(TransportClass::Wifi))
        }
    }

    async fn maintain(&mut self) -> Result<(), TransportError> {
        if self.is_connected().await {
            return Ok(());
        }
        self.connect().await
    }

    fn secure_client(&mut self) -> Option<&mut SecureClient> {
        Some(&mut self.secure)
    }

    async fn network_time(&mut self) -> Option<NetworkTime> {
        if !self.connected {
            return None;
        }
        self.radio.network_time().await
    }

    async fn power_save(&mut self, enabled: bool) -> Result<(), TransportError> {
        self.radio.set_power_save(enabled).await
    }

    async fn restore(&mut self) -> Result<(), TransportError> {
        info!("Restoring Wi-Fi transport");
        self.off().await?;
        self.store_loaded = false;
        self.init().await
    }

    fn connection_attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockWifiRadio;

    fn fast_settings() -> WifiSettings {
        WifiSettings {
            connect_timeout: Duration::from_millis(300),
            retry_pause: Duration::from_millis(10),
            ..WifiSettings::default()
        }
    }

    #[test]
    fn test_store_rejects_eleventh_network() {
        let mut store = NetworkStore::in_memory();
        for i in 0..MAX_KNOWN_NETWORKS {
            store.add(KnownNetwork::new(format!("net-{i}"), "pw")).unwrap();
        }

        let result = store.add(KnownNetwork::new("one-too-many", "pw"));

        assert!(matches!(result, Err(TransportError::NetworkLimit(10))));
        assert_eq!(store.networks().len(), MAX_KNOWN_NETWORKS);
    }

    #[test]
    fn test_store_updates_existing_password() {
        let mut store = NetworkStore::in_memory();
        store.add(KnownNetwork::new("home", "old")).unwrap();
        store.add(KnownNetwork::new("home", "new")).unwrap();

        assert_eq!(store.networks().len(), 1);
        assert_eq!(store.networks()[0].password, "new");
        assert!(store.remove("home"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_round_trips_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("networks.toml");
        let mut store = NetworkStore::at(&path);
        store.add(KnownNetwork::new("office", "hunter2")).unwrap();
        store.save().unwrap();

        let mut reloaded = NetworkStore::at(&path);
        reloaded.load().unwrap();

        assert_eq!(reloaded.networks(), store.networks());
    }

    #[test]
    fn test_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = NetworkStore::at(dir.path().join("absent.toml"));
        store.load().unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_to_reachable_network() {
        let (radio, state) = MockWifiRadio::new();
        state.make_reachable("office");
        let mut store = NetworkStore::in_memory();
        store.add(KnownNetwork::new("cafe", "pw")).unwrap();
        store.add(KnownNetwork::new("office", "pw")).unwrap();
        let mut wifi = WifiTransport::new(Box::new(radio), store, fast_settings());

        wifi.init().await.unwrap();

        assert!(wifi.is_connected().await);
        assert_eq!(state.association_requests(), vec!["cafe", "office"]);
        assert_eq!(wifi.connection_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_when_no_network_reachable() {
        let (radio, _state) = MockWifiRadio::new();
        let mut store = NetworkStore::in_memory();
        store.add(KnownNetwork::new("cafe", "pw")).unwrap();
        let mut wifi = WifiTransport::new(Box::new(radio), store, fast_settings());

        let result = wifi.init().await;

        assert!(matches!(result, Err(TransportError::LinkDown(TransportClass::Wifi))));
        assert!(!wifi.is_connected().await);
        assert_eq!(wifi.connection_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_network_added_on_first_init() {
        let (radio, state) = MockWifiRadio::new();
        state.make_reachable("factory");
        let settings = WifiSettings {
            default_network: Some(KnownNetwork::new("factory", "pw")),
            ..fast_settings()
        };
        let mut wifi = WifiTransport::new(Box::new(radio), NetworkStore::in_memory(), settings);

        wifi.init().await.unwrap();

        assert_eq!(wifi.networks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_on_resets_secure_client() {
        let (radio, state) = MockWifiRadio::new();
        state.make_reachable("home");
        let mut store = NetworkStore::in_memory();
        store.add(KnownNetwork::new("home", "pw")).unwrap();
        let mut wifi = WifiTransport::new(Box::new(radio), store, fast_settings());
        wifi.secure_client().unwrap().set_insecure(true);

        wifi.on().await.unwrap();

        let secure = wifi.secure_client().unwrap();
        assert!(!secure.is_insecure());
        assert_eq!(secure.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_trigger_factory_reset() {
        let (radio, state) = MockWifiRadio::new();
        let mut store = NetworkStore::in_memory();
        store.add(KnownNetwork::new("cafe", "pw")).unwrap();
        let settings = WifiSettings {
            max_connection_attempts: 3,
            ..fast_settings()
        };
        let mut wifi = WifiTransport::new(Box::new(radio), store, settings);

        for _ in 0..3 {
            let _ = wifi.init().await;
        }

        assert_eq!(state.factory_resets(), 1);
        assert_eq!(wifi.connection_attempts(), 0);
    }
}
