//! Device configuration
//!
//! One TOML file describes the device identity, the broker endpoint, where
//! certificates live, which transports exist, and the timing of every layer.
//! Secrets are never stored in the file: it names environment variables that
//! hold them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::certificates::{CertificateNames, FileCertificateStore};
use crate::registration::{validate_device_id, RegistrationSettings, TopicLayout, DEFAULT_PREFIX};
use crate::registry::{TopicRegistry, DEFAULT_CALLBACKS_PER_PATTERN, DEFAULT_MAX_PATTERNS};
use crate::runner::RunnerSettings;
use crate::session::{BrokerSettings, SessionSettings};
use crate::transport::{
    BluetoothSettings, CellularSettings, ConnectionPreference, HostSettings, KnownNetwork,
    NetworkStore, WifiSettings,
};

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub certificates: CertificatesSection,
    #[serde(default)]
    pub transports: TransportsSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub registration: RegistrationSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Public device id (must match [a-zA-Z0-9._-]+); doubles as MQTT client id
    pub id: String,
    /// Numeric log level, 0 (silent) to 6 (verbose)
    #[serde(default = "default_log_level")]
    pub log_level: u8,
}

fn default_log_level() -> u8 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// `mqtts://host:port` for TLS, `mqtt://host:port` for plain TCP
    pub url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_inbound_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificatesSection {
    /// Directory holding the three PEM files
    #[serde(default = "default_certificate_dir")]
    pub directory: PathBuf,
    #[serde(default)]
    pub names: CertificateNames,
}

fn default_certificate_dir() -> PathBuf {
    PathBuf::from("certs")
}

impl Default for CertificatesSection {
    fn default() -> Self {
        Self {
            directory: default_certificate_dir(),
            names: CertificateNames::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportsSection {
    #[serde(default)]
    pub preference: ConnectionPreference,
    /// Pause after the current transport dropped and could not be revived
    #[serde(default = "default_fallthrough_pause_ms")]
    pub fallthrough_pause_ms: u64,
    /// Pause after powering off a failed candidate
    #[serde(default = "default_switch_pause_ms")]
    pub switch_pause_ms: u64,
    pub wifi: Option<WifiSection>,
    pub cellular: Option<CellularSection>,
    pub bluetooth: Option<BluetoothSection>,
    pub host: Option<HostSection>,
}

fn default_fallthrough_pause_ms() -> u64 {
    5000
}

fn default_switch_pause_ms() -> u64 {
    1000
}

impl Default for TransportsSection {
    fn default() -> Self {
        Self {
            preference: ConnectionPreference::default(),
            fallthrough_pause_ms: default_fallthrough_pause_ms(),
            switch_pause_ms: default_switch_pause_ms(),
            wifi: None,
            cellular: None,
            bluetooth: None,
            host: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WifiSection {
    /// Where known networks are persisted; in memory when absent
    pub networks_file: Option<PathBuf>,
    /// Network added on first init
    pub ssid: Option<String>,
    /// Environment variable containing the default network's password
    pub password_env: Option<String>,
    #[serde(default = "default_wifi_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_wifi_retry_pause_secs")]
    pub retry_pause_secs: u64,
    #[serde(default = "default_wifi_max_attempts")]
    pub max_connection_attempts: u32,
}

fn default_wifi_connect_timeout_secs() -> u64 {
    10
}

fn default_wifi_retry_pause_secs() -> u64 {
    10
}

fn default_wifi_max_attempts() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellularSection {
    #[serde(default)]
    pub apn: String,
    #[serde(default)]
    pub gprs_user: String,
    pub gprs_password_env: Option<String>,
    pub sim_pin_env: Option<String>,
    #[serde(default = "default_network_mode")]
    pub network_mode: u8,
    #[serde(default = "default_cellular_max_attempts")]
    pub max_connection_attempts: u32,
}

fn default_network_mode() -> u8 {
    2
}

fn default_cellular_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BluetoothSection {
    #[serde(default = "default_bluetooth_name")]
    pub name: String,
}

fn default_bluetooth_name() -> String {
    "devicelink".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// `host:port` probed for connectivity; the broker endpoint when absent
    pub probe_address: Option<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_probe_timeout_secs() -> u64 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_session_attempts")]
    pub max_connection_attempts: u8,
    #[serde(default = "default_attempt_delay_ms")]
    pub attempt_delay_ms: u64,
    #[serde(default = "default_restoration_threshold")]
    pub restoration_threshold: u8,
    #[serde(default = "default_reconnect_pause_ms")]
    pub reconnect_pause_ms: u64,
    #[serde(default = "default_backoff_initial_secs")]
    pub restore_backoff_initial_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub restore_backoff_max_secs: u64,
    /// Skip certificates; implied by an `mqtt://` broker URL
    #[serde(default)]
    pub insecure: bool,
}

fn default_session_attempts() -> u8 {
    5
}

fn default_attempt_delay_ms() -> u64 {
    500
}

fn default_restoration_threshold() -> u8 {
    10
}

fn default_reconnect_pause_ms() -> u64 {
    500
}

fn default_backoff_initial_secs() -> u64 {
    30
}

fn default_backoff_max_secs() -> u64 {
    15 * 60
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_connection_attempts: default_session_attempts(),
            attempt_delay_ms: default_attempt_delay_ms(),
            restoration_threshold: default_restoration_threshold(),
            reconnect_pause_ms: default_reconnect_pause_ms(),
            restore_backoff_initial_secs: default_backoff_initial_secs(),
            restore_backoff_max_secs: default_backoff_max_secs(),
            insecure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySection {
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
    #[serde(default = "default_callbacks_per_pattern")]
    pub callbacks_per_pattern: usize,
}

fn default_max_patterns() -> usize {
    DEFAULT_MAX_PATTERNS
}

fn default_callbacks_per_pattern() -> usize {
    DEFAULT_CALLBACKS_PER_PATTERN
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            max_patterns: default_max_patterns(),
            callbacks_per_pattern: default_callbacks_per_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationSection {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_registration_delay_secs")]
    pub delay_secs: u64,
    #[serde(default = "default_max_functions")]
    pub max_functions: usize,
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
}

fn default_topic_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_registration_delay_secs() -> u64 {
    10
}

fn default_max_functions() -> usize {
    20
}

fn default_maintenance_interval_ms() -> u64 {
    1000
}

impl Default for RegistrationSection {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            delay_secs: default_registration_delay_secs(),
            max_functions: default_max_functions(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerSection {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_init_retry_ms")]
    pub init_retry_ms: u64,
    /// No progress for this long marks the runner stuck
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// Longest a queued call waits for the runner
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_tick_ms() -> u64 {
    50
}

fn default_init_retry_ms() -> u64 {
    500
}

fn default_stuck_threshold_secs() -> u64 {
    600
}

fn default_command_capacity() -> usize {
    32
}

fn default_command_timeout_ms() -> u64 {
    5000
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            init_retry_ms: default_init_retry_ms(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            command_capacity: default_command_capacity(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Broker address split out of the configured URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(url)
            .map_err(|e| ConfigError::InvalidConfig(format!("Invalid broker URL '{url}': {e}")))?;

        let (tls, default_port) = match parsed.scheme() {
            "mqtts" | "ssl" => (true, 8883),
            "mqtt" | "tcp" => (false, 1883),
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "Unsupported broker URL scheme '{other}'"
                )))
            }
        };
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidConfig(format!("Broker URL '{url}' has no host")))?;

        Ok(Self {
            host: host.to_string(),
            port: parsed.port().unwrap_or(default_port),
            tls,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DeviceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id).map_err(|e| {
            ConfigError::InvalidDeviceId(format!("'{}': {e}", self.device.id))
        })?;

        if self.device.log_level > 6 {
            return Err(ConfigError::InvalidConfig(format!(
                "log_level must be 0-6, got {}",
                self.device.log_level
            )));
        }

        BrokerEndpoint::parse(&self.broker.url)?;

        if self.broker.inbound_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.inbound_capacity must be non-zero".to_string(),
            ));
        }
        if self.session.max_connection_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.max_connection_attempts must be non-zero".to_string(),
            ));
        }
        if self.registry.max_patterns == 0 || self.registry.callbacks_per_pattern == 0 {
            return Err(ConfigError::InvalidConfig(
                "registry capacities must be non-zero".to_string(),
            ));
        }
        if self.runner.tick_ms == 0 || self.runner.command_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "runner.tick_ms and runner.command_capacity must be non-zero".to_string(),
            ));
        }

        let t = &self.transports;
        if t.wifi.is_none() && t.cellular.is_none() && t.bluetooth.is_none() && t.host.is_none() {
            return Err(ConfigError::InvalidConfig(
                "At least one transport must be configured".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }

    pub fn broker_endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        BrokerEndpoint::parse(&self.broker.url)
    }

    pub fn broker_settings(&self) -> Result<BrokerSettings, ConfigError> {
        let endpoint = self.broker_endpoint()?;
        let mut settings = BrokerSettings::new(endpoint.host, endpoint.port, &self.device.id);
        settings.keep_alive = Duration::from_secs(self.broker.keep_alive_secs);
        settings.username = self.get_mqtt_username();
        settings.password = self.get_mqtt_password();
        settings.clean_session = self.broker.clean_session;
        settings.inbound_capacity = self.broker.inbound_capacity;
        Ok(settings)
    }

    /// Session settings; a plain `mqtt://` broker implies insecure mode
    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        let endpoint = self.broker_endpoint()?;
        let s = &self.session;
        Ok(SessionSettings {
            max_connection_attempts: s.max_connection_attempts,
            attempt_delay: Duration::from_millis(s.attempt_delay_ms),
            restoration_threshold: s.restoration_threshold,
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            reconnect_pause: Duration::from_millis(s.reconnect_pause_ms),
            restore_backoff_initial: Duration::from_secs(s.restore_backoff_initial_secs),
            restore_backoff_max: Duration::from_secs(s.restore_backoff_max_secs),
            insecure: s.insecure || !endpoint.tls,
        })
    }

    pub fn topic_registry(&self) -> TopicRegistry {
        TopicRegistry::with_limits(self.registry.max_patterns, self.registry.callbacks_per_pattern)
    }

    pub fn topic_layout(&self) -> TopicLayout {
        TopicLayout::new(&self.registration.topic_prefix, &self.device.id)
    }

    pub fn registration_settings(&self) -> RegistrationSettings {
        RegistrationSettings {
            delay: Duration::from_secs(self.registration.delay_secs),
            max_functions: self.registration.max_functions,
            maintenance_interval: Duration::from_millis(self.registration.maintenance_interval_ms),
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            tick: Duration::from_millis(self.runner.tick_ms),
            init_retry: Duration::from_millis(self.runner.init_retry_ms),
            stuck_threshold: Duration::from_secs(self.runner.stuck_threshold_secs),
            command_capacity: self.runner.command_capacity,
            command_timeout: Duration::from_millis(self.runner.command_timeout_ms),
        }
    }

    pub fn transport_pauses(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.transports.fallthrough_pause_ms),
            Duration::from_millis(self.transports.switch_pause_ms),
        )
    }

    pub fn certificate_store(&self) -> FileCertificateStore {
        FileCertificateStore::new(&self.certificates.directory)
    }

    /// Wi-Fi settings, resolving the default network's password from the environment
    pub fn wifi_settings(&self) -> Result<Option<WifiSettings>, ConfigError> {
        let Some(wifi) = &self.transports.wifi else {
            return Ok(None);
        };

        let default_network = match &wifi.ssid {
            Some(ssid) => {
                let password = match &wifi.password_env {
                    Some(env) => Self::get_env_var_required(env)?,
                    None => String::new(),
                };
                Some(KnownNetwork::new(ssid.clone(), password))
            }
            None => None,
        };

        Ok(Some(WifiSettings {
            connect_timeout: Duration::from_secs(wifi.connect_timeout_secs),
            retry_pause: Duration::from_secs(wifi.retry_pause_secs),
            max_connection_attempts: wifi.max_connection_attempts,
            default_network,
            ..WifiSettings::default()
        }))
    }

    pub fn network_store(&self) -> NetworkStore {
        match self.transports.wifi.as_ref().and_then(|w| w.networks_file.as_ref()) {
            Some(path) => NetworkStore::at(path),
            None => NetworkStore::in_memory(),
        }
    }

    pub fn cellular_settings(&self) -> Result<Option<CellularSettings>, ConfigError> {
        let Some(cellular) = &self.transports.cellular else {
            return Ok(None);
        };

        let gprs_password = match &cellular.gprs_password_env {
            Some(env) => Self::get_env_var_required(env)?,
            None => String::new(),
        };
        let sim_pin = cellular
            .sim_pin_env
            .as_deref()
            .map(Self::get_env_var_required)
            .transpose()?;

        Ok(Some(CellularSettings {
            apn: cellular.apn.clone(),
            gprs_user: cellular.gprs_user.clone(),
            gprs_password,
            sim_pin,
            network_mode: cellular.network_mode,
            max_connection_attempts: cellular.max_connection_attempts,
            ..CellularSettings::default()
        }))
    }

    pub fn bluetooth_settings(&self) -> Option<BluetoothSettings> {
        self.transports.bluetooth.as_ref().map(|bt| BluetoothSettings {
            name: bt.name.clone(),
            ..BluetoothSettings::default()
        })
    }

    /// Host transport settings; probes the broker endpoint unless told otherwise
    pub fn host_settings(&self) -> Result<Option<HostSettings>, ConfigError> {
        let Some(host) = &self.transports.host else {
            return Ok(None);
        };
        let probe_address = match &host.probe_address {
            Some(address) => address.clone(),
            None => self.broker_endpoint()?.address(),
        };
        let mut settings = HostSettings::new(probe_address);
        settings.probe_timeout = Duration::from_secs(host.probe_timeout_secs);
        Ok(Some(settings))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "DEV1"

[broker]
url = "mqtts://broker.example.com:8883"

[transports.host]
"#;
        Self::from_toml(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[device]
id = "DEV1"
log_level = 5

[broker]
url = "mqtts://broker.example.com:8883"
username_env = "DEVICELINK_TEST_USER"
keep_alive_secs = 60

[certificates]
directory = "/etc/devicelink/certs"

[certificates.names]
ca = "root.pem"

[transports]
preference = "cellular_preferred"

[transports.wifi]
ssid = "office"

[transports.cellular]
apn = "iot.example"

[registration]
topic_prefix = "ACME/Devices"
delay_secs = 5
"#;

        let config = DeviceConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.device.id, "DEV1");
        assert_eq!(config.device.log_level, 5);
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.certificates.names.ca, "root.pem");
        assert_eq!(config.certificates.names.certificate, "device.pem.crt");
        assert_eq!(config.transports.preference, ConnectionPreference::CellularPreferred);
        assert_eq!(config.transports.cellular.as_ref().unwrap().network_mode, 2);
        assert_eq!(
            config.topic_layout().register_topic(),
            "ACME/Devices/Register/DEV1"
        );
        assert_eq!(config.registration_settings().delay, Duration::from_secs(5));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = DeviceConfig::test_config();
        assert_eq!(config.device.log_level, 4);
        assert_eq!(config.session.max_connection_attempts, 5);
        assert_eq!(config.session.restoration_threshold, 10);
        assert_eq!(config.registry.max_patterns, 20);
        assert_eq!(config.registry.callbacks_per_pattern, 3);
        assert_eq!(config.registration.topic_prefix, "HY/Post");
        assert_eq!(config.registration.max_functions, 20);
        assert_eq!(config.runner.tick_ms, 50);
        assert_eq!(config.transports.preference, ConnectionPreference::WifiPreferred);
    }

    #[test]
    fn test_invalid_device_id() {
        let toml_content = r#"
[device]
id = "bad/id"

[broker]
url = "mqtts://broker.example.com"

[transports.host]
"#;
        let result = DeviceConfig::from_toml(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidDeviceId(_))));
    }

    #[test]
    fn test_broker_endpoint_parsing() {
        let tls = BrokerEndpoint::parse("mqtts://broker.example.com").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.tls);

        let plain = BrokerEndpoint::parse("mqtt://localhost:1884").unwrap();
        assert_eq!(plain.address(), "localhost:1884");
        assert!(!plain.tls);

        assert!(BrokerEndpoint::parse("http://broker.example.com").is_err());
        assert!(BrokerEndpoint::parse("not a url").is_err());
    }

    #[test]
    fn test_plain_broker_implies_insecure_session() {
        let mut config = DeviceConfig::test_config();
        assert!(!config.session_settings().unwrap().insecure);

        config.broker.url = "mqtt://localhost:1883".to_string();
        assert!(config.session_settings().unwrap().insecure);
    }

    #[test]
    fn test_host_probe_defaults_to_broker() {
        let config = DeviceConfig::test_config();
        let host = config.host_settings().unwrap().unwrap();
        assert_eq!(host.probe_address, "broker.example.com:8883");
    }

    #[test]
    fn test_missing_transport_rejected() {
        let toml_content = r#"
[device]
id = "DEV1"

[broker]
url = "mqtts://broker.example.com"
"#;
        let result = DeviceConfig::from_toml(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_wifi_password_env_required() {
        let toml_content = r#"
[device]
id = "DEV1"

[broker]
url = "mqtts://broker.example.com"

[transports.wifi]
ssid = "office"
password_env = "DEVICELINK_TEST_WIFI_PASSWORD_UNSET"
"#;
        let config = DeviceConfig::from_toml(toml_content).unwrap();
        let result = config.wifi_settings();
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
    }

    #[test]
    fn test_log_level_bounds() {
        let mut config = DeviceConfig::test_config();
        config.device.log_level = 7;
        assert!(config.validate().is_err());
    }
}
