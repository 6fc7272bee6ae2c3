//! Shared builders for integration tests

#![allow(dead_code)]

use devicelink::certificates::{CertificateCache, CertificateNames};
use devicelink::registration::{RegistrationProtocol, RegistrationSettings, TopicLayout};
use devicelink::registry::TopicRegistry;
use devicelink::session::{BrokerSettings, SessionProcessor, SessionSettings};
use devicelink::testing::{MockBrokerState, MockCertificateStore, MockConnector, MockTransport, RecordingIndicator};
use devicelink::transport::{ConnectionPreference, Link, TransportManager};
use std::sync::Arc;
use std::time::Duration;

pub const DEVICE_ID: &str = "DEV1";

pub fn external(mock: MockTransport) -> Link {
    Link::External(Box::new(mock))
}

/// Manager over mock links with short failover pauses
pub fn manager(preference: ConnectionPreference, mocks: Vec<MockTransport>) -> TransportManager {
    TransportManager::new(preference, mocks.into_iter().map(external).collect())
        .with_pauses(Duration::from_millis(20), Duration::from_millis(10))
}

pub fn quick_session_settings() -> SessionSettings {
    SessionSettings {
        attempt_delay: Duration::from_millis(10),
        reconnect_pause: Duration::from_millis(10),
        ..SessionSettings::default()
    }
}

pub struct SessionFixture {
    pub processor: SessionProcessor,
    pub broker: Arc<MockBrokerState>,
    pub certificates: Arc<MockCertificateStore>,
    pub indicator: Arc<RecordingIndicator>,
}

pub fn session_fixture(
    manager: TransportManager,
    store: MockCertificateStore,
    settings: SessionSettings,
) -> SessionFixture {
    let (connector, broker) = MockConnector::new();
    let certificates = Arc::new(store);
    let indicator = Arc::new(RecordingIndicator::default());
    let processor = SessionProcessor::new(
        manager,
        Arc::new(connector),
        CertificateCache::new(certificates.clone(), CertificateNames::default()),
        TopicRegistry::new(),
        indicator.clone(),
        BrokerSettings::new("broker.example.com", 8883, DEVICE_ID),
        settings,
    );
    SessionFixture {
        processor,
        broker,
        certificates,
        indicator,
    }
}

pub struct ProtocolFixture {
    pub protocol: RegistrationProtocol,
    pub broker: Arc<MockBrokerState>,
    pub certificates: Arc<MockCertificateStore>,
}

pub fn protocol_fixture(manager: TransportManager, settings: RegistrationSettings) -> ProtocolFixture {
    let fixture = session_fixture(manager, MockCertificateStore::complete(), quick_session_settings());
    ProtocolFixture {
        protocol: RegistrationProtocol::new(
            fixture.processor,
            TopicLayout::new("HY/Post", DEVICE_ID),
            settings,
        ),
        broker: fixture.broker,
        certificates: fixture.certificates,
    }
}

/// Parse a published JSON payload
pub fn json(payload: &str) -> serde_json::Value {
    serde_json::from_str(payload).expect("payload is JSON")
}
