//! Configuration loading tests
//!
//! Load device files from disk and check the settings every layer is built
//! from, plus the on-disk stores the configuration points at.

use devicelink::certificates::{CertificateCache, CertificateError, CertificateStore};
use devicelink::config::{ConfigError, DeviceConfig};
use devicelink::testing::{TEST_CA_PEM, TEST_CERT_PEM, TEST_KEY_PEM};
use devicelink::transport::{ConnectionPreference, KnownNetwork};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_from_file() {
    let file = write_config(
        r#"
[device]
id = "pump-07"
log_level = 3

[broker]
url = "mqtts://iot.example.com"

[transports]
preference = "wifi_only"
switch_pause_ms = 250

[transports.wifi]
ssid = "plant-floor"

[session]
max_connection_attempts = 3
restoration_threshold = 4

[runner]
tick_ms = 20
"#,
    );

    let config = DeviceConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.device.id, "pump-07");
    assert_eq!(config.transports.preference, ConnectionPreference::WifiOnly);

    let broker = config.broker_settings().unwrap();
    assert_eq!(broker.host, "iot.example.com");
    assert_eq!(broker.port, 8883);
    assert_eq!(broker.client_id, "pump-07");

    let session = config.session_settings().unwrap();
    assert_eq!(session.max_connection_attempts, 3);
    assert_eq!(session.restoration_threshold, 4);
    assert!(!session.insecure);

    let runner = config.runner_settings();
    assert_eq!(runner.tick, Duration::from_millis(20));
    assert_eq!(runner.stuck_threshold, Duration::from_secs(600));
    assert_eq!(
        config.transport_pauses(),
        (Duration::from_millis(5000), Duration::from_millis(250))
    );

    let wifi = config.wifi_settings().unwrap().unwrap();
    assert_eq!(
        wifi.default_network,
        Some(KnownNetwork::new("plant-floor", ""))
    );
    assert!(config.cellular_settings().unwrap().is_none());
}

#[test]
fn test_missing_file_is_read_error() {
    let dir = TempDir::new().unwrap();
    let result = DeviceConfig::load_from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let file = write_config("[device\nid = ");
    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_validation_runs_on_load() {
    let file = write_config(
        r#"
[device]
id = "bad id!"

[broker]
url = "mqtts://iot.example.com"

[transports.host]
"#,
    );
    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidDeviceId(_))));
}

#[test]
fn test_unsupported_broker_scheme_rejected() {
    let file = write_config(
        r#"
[device]
id = "DEV1"

[broker]
url = "http://iot.example.com"

[transports.host]
"#,
    );
    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_cellular_secrets_come_from_environment() {
    let file = write_config(
        r#"
[device]
id = "DEV1"

[broker]
url = "mqtt://localhost"

[transports.cellular]
apn = "iot.example"
sim_pin_env = "DEVICELINK_TEST_SIM_PIN_UNSET"
"#,
    );
    let config = DeviceConfig::load_from_file(file.path()).unwrap();

    assert!(matches!(
        config.cellular_settings(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "DEVICELINK_TEST_SIM_PIN_UNSET"
    ));
    assert!(config.session_settings().unwrap().insecure);
}

#[test]
fn test_network_store_persists_to_configured_file() {
    let dir = TempDir::new().unwrap();
    let networks = dir.path().join("networks.toml");
    let file = write_config(&format!(
        r#"
[device]
id = "DEV1"

[broker]
url = "mqtts://iot.example.com"

[transports.wifi]
networks_file = "{}"
"#,
        networks.display()
    ));
    let config = DeviceConfig::load_from_file(file.path()).unwrap();

    let mut store = config.network_store();
    store.load().unwrap();
    assert!(store.is_empty());
    store.add(KnownNetwork::new("home", "secret")).unwrap();
    store.add(KnownNetwork::new("home", "rotated")).unwrap();
    store.save().unwrap();

    let mut reloaded = config.network_store();
    reloaded.load().unwrap();
    assert_eq!(reloaded.networks(), &[KnownNetwork::new("home", "rotated")]);
}

#[tokio::test]
async fn test_certificate_store_reads_configured_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("ca.pem"), TEST_CA_PEM).unwrap();
    std::fs::write(dir.path().join("device.pem.crt"), TEST_CERT_PEM).unwrap();
    std::fs::write(dir.path().join("private.pem.key"), TEST_KEY_PEM).unwrap();
    let file = write_config(&format!(
        r#"
[device]
id = "DEV1"

[broker]
url = "mqtts://iot.example.com"

[certificates]
directory = "{}"

[transports.host]
"#,
        dir.path().display()
    ));
    let config = DeviceConfig::load_from_file(file.path()).unwrap();
    let store = Arc::new(config.certificate_store());

    assert!(matches!(
        store.read("missing.pem").await,
        Err(CertificateError::Missing(_))
    ));

    let mut cache = CertificateCache::new(store, config.certificates.names.clone());
    let bundle = cache.load().await.unwrap();
    assert_eq!(bundle.ca, TEST_CA_PEM);
    assert_eq!(bundle.private_key, TEST_KEY_PEM);
}
