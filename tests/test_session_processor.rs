//! Session lifecycle tests
//!
//! Covers certificate loading, broker retries, escalation to a transport
//! restore, re-subscription on connect, and keep-alive repair.

mod test_helpers;

use devicelink::registry::TopicCallback;
use devicelink::session::{SessionError, SessionPhase, SessionSettings};
use devicelink::testing::{MockCertificateStore, MockTransport};
use devicelink::transport::{ConnectionPreference, TransportClass};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{manager, quick_session_settings, session_fixture, DEVICE_ID};

fn recorder() -> (TopicCallback, Arc<Mutex<Vec<(String, String)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: TopicCallback = Arc::new(move |topic: &str, payload: &str| {
        sink.lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
    });
    (callback, seen)
}

async fn connected_wifi() -> test_helpers::SessionFixture {
    let (wifi, _) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    manager.init().await.unwrap();
    session_fixture(manager, MockCertificateStore::complete(), quick_session_settings())
}

#[tokio::test(start_paused = true)]
async fn test_init_binds_tls_session_over_current_transport() {
    let mut fixture = connected_wifi().await;

    fixture.processor.init().await.unwrap();

    assert_eq!(fixture.processor.phase(), SessionPhase::Connected);
    assert!(fixture.processor.is_connected());
    assert_eq!(fixture.processor.transport_class(), TransportClass::Wifi);
    assert!(fixture.indicator.is_breathing());
    assert_eq!(fixture.certificates.reads(), 3);

    let binds = fixture.broker.binds();
    assert_eq!(binds.len(), 1);
    assert_eq!(binds[0].class, TransportClass::Wifi);
    assert_eq!(binds[0].client_id, DEVICE_ID);
    assert!(binds[0].has_credentials);
    assert!(!binds[0].insecure);
}

#[tokio::test(start_paused = true)]
async fn test_certificates_read_once_across_reconnects() {
    let mut fixture = connected_wifi().await;

    fixture.processor.init().await.unwrap();
    fixture.processor.stop().await;
    fixture.processor.init().await.unwrap();

    assert_eq!(fixture.certificates.reads(), 3);
    assert_eq!(fixture.broker.binds().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_insecure_mode_skips_certificates() {
    let (wifi, _) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    manager.init().await.unwrap();
    let settings = SessionSettings {
        insecure: true,
        ..quick_session_settings()
    };
    let mut fixture = session_fixture(manager, MockCertificateStore::empty(), settings);

    fixture.processor.init().await.unwrap();

    assert_eq!(fixture.certificates.reads(), 0);
    let bind = &fixture.broker.binds()[0];
    assert!(bind.insecure);
    assert!(!bind.has_credentials);
}

#[tokio::test(start_paused = true)]
async fn test_transport_without_secure_client_is_rejected() {
    let (wifi, _) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(
        ConnectionPreference::WifiPreferred,
        vec![wifi.without_secure_client()],
    );
    manager.init().await.unwrap();
    let mut fixture = session_fixture(manager, MockCertificateStore::complete(), quick_session_settings());

    let result = fixture.processor.init().await;

    assert!(matches!(
        result,
        Err(SessionError::NoSecureClient(TransportClass::Wifi))
    ));
    assert_eq!(fixture.processor.phase(), SessionPhase::Uninitialized);
    assert!(fixture.broker.binds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_certificate_is_permanent() {
    let (wifi, _) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    manager.init().await.unwrap();
    let store = MockCertificateStore::complete().without("private.pem.key");
    let mut fixture = session_fixture(manager, store, quick_session_settings());

    let error = fixture.processor.init().await.unwrap_err();

    assert!(matches!(error, SessionError::Certificates(_)));
    assert!(!error.is_transient());
    assert_eq!(fixture.broker.connect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_init_requires_connected_transport() {
    let (wifi, _) = MockTransport::new(TransportClass::Wifi);
    let manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    let mut fixture = session_fixture(manager, MockCertificateStore::complete(), quick_session_settings());

    let result = fixture.processor.init().await;

    assert!(matches!(result, Err(SessionError::TransportDown)));
    assert_eq!(fixture.certificates.reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_broker_connect_retries_then_gives_up() {
    let mut fixture = connected_wifi().await;
    fixture.broker.fail_next_connects(5);

    let result = fixture.processor.init().await;

    assert!(matches!(result, Err(SessionError::AttemptsExhausted(5))));
    assert_eq!(fixture.broker.connect_calls(), 5);
    assert_eq!(fixture.processor.phase(), SessionPhase::Uninitialized);
    assert!(!fixture.indicator.is_breathing());
}

#[tokio::test(start_paused = true)]
async fn test_broker_connect_succeeds_on_later_attempt() {
    let mut fixture = connected_wifi().await;
    fixture.broker.fail_next_connects(2);

    fixture.processor.init().await.unwrap();

    assert_eq!(fixture.broker.connect_calls(), 3);
    assert_eq!(fixture.processor.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_restore_transport_and_cool_down() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    manager.init().await.unwrap();
    let settings = SessionSettings {
        restoration_threshold: 2,
        ..quick_session_settings()
    };
    let mut fixture = session_fixture(manager, MockCertificateStore::complete(), settings);
    fixture.broker.fail_next_connects(10);

    assert!(fixture.processor.init().await.is_err());
    assert_eq!(wifi_state.restores(), 0);
    assert!(fixture.processor.init().await.is_err());
    assert_eq!(wifi_state.restores(), 1);
    assert!(!fixture.processor.certificates().is_cached());

    let cooling = fixture.processor.init().await;
    assert!(matches!(cooling, Err(SessionError::CoolingDown(_))));
    assert_eq!(fixture.broker.connect_calls(), 10);

    tokio::time::sleep(Duration::from_secs(31)).await;
    fixture.processor.init().await.unwrap();

    assert_eq!(fixture.broker.connect_calls(), 11);
    assert_eq!(fixture.certificates.reads(), 6);
    assert!(fixture.processor.restore_backoff().current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_patterns_resubscribed_on_connect() {
    let mut fixture = connected_wifi().await;
    let (first, _) = recorder();
    let (second, _) = recorder();

    fixture.processor.subscribe("a/b", first).await.unwrap();
    fixture.processor.subscribe("sensors/#", second).await.unwrap();
    assert!(fixture.broker.subscriptions().is_empty());

    fixture.processor.init().await.unwrap();
    assert_eq!(fixture.broker.subscriptions(), vec!["a/b", "sensors/#"]);

    fixture.processor.stop().await;
    fixture.broker.clear_subscriptions();
    fixture.processor.init().await.unwrap();
    assert_eq!(fixture.broker.subscriptions(), vec!["a/b", "sensors/#"]);
}

#[tokio::test(start_paused = true)]
async fn test_broker_subscribe_sent_once_per_pattern() {
    let mut fixture = connected_wifi().await;
    fixture.processor.init().await.unwrap();
    let (first, _) = recorder();
    let (second, _) = recorder();

    fixture.processor.subscribe("alerts/+", first).await.unwrap();
    fixture.processor.subscribe("alerts/+", second).await.unwrap();

    assert_eq!(fixture.broker.subscriptions(), vec!["alerts/+"]);
    assert_eq!(fixture.processor.registry().callback_count("alerts/+"), 2);

    fixture.processor.unsubscribe("alerts/+").await.unwrap();
    assert_eq!(fixture.broker.unsubscriptions(), vec!["alerts/+"]);
    assert!(fixture.processor.unsubscribe("alerts/+").await.is_err());
    assert_eq!(fixture.broker.unsubscriptions(), vec!["alerts/+"]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_subscribe_leaves_no_route() {
    let mut fixture = connected_wifi().await;
    fixture.processor.init().await.unwrap();
    fixture.broker.set_fail_subscribes(true);

    let (callback, _) = recorder();
    let result = fixture.processor.subscribe("alerts/+", callback).await;
    assert!(matches!(result, Err(SessionError::SubscriptionFailed(_))));
    assert!(!fixture.processor.registry().contains("alerts/+"));
    assert_eq!(fixture.processor.registry().callback_count("alerts/+"), 0);

    fixture.broker.set_fail_subscribes(false);
    let (callback, _) = recorder();
    fixture.processor.subscribe("alerts/+", callback).await.unwrap();
    assert_eq!(fixture.processor.registry().callback_count("alerts/+"), 1);
    assert_eq!(fixture.broker.subscriptions(), vec!["alerts/+"]);
}

#[tokio::test(start_paused = true)]
async fn test_publish_fails_fast_while_down() {
    let mut fixture = connected_wifi().await;

    let result = fixture.processor.publish("status", "up").await;
    assert!(matches!(result, Err(SessionError::NotConnected)));
    assert_eq!(fixture.broker.connect_calls(), 0);

    fixture.processor.init().await.unwrap();
    fixture.processor.publish("status", "up").await.unwrap();
    assert_eq!(fixture.broker.published_on("status"), vec!["up"]);
}

#[tokio::test(start_paused = true)]
async fn test_poll_dispatches_to_first_matching_pattern() {
    let mut fixture = connected_wifi().await;
    let (wide, wide_seen) = recorder();
    let (narrow, narrow_seen) = recorder();
    fixture.processor.subscribe("sensors/#", wide).await.unwrap();
    fixture.processor.subscribe("sensors/temp", narrow).await.unwrap();
    fixture.processor.init().await.unwrap();

    fixture.broker.inject("sensors/temp", "21.5");
    fixture.broker.inject("other/topic", "ignored");

    assert_eq!(fixture.processor.poll(), 2);
    assert_eq!(
        wide_seen.lock().unwrap().clone(),
        vec![("sensors/temp".to_string(), "21.5".to_string())]
    );
    assert!(narrow_seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_is_idle_while_disconnected() {
    let mut fixture = connected_wifi().await;
    let (callback, seen) = recorder();
    fixture.processor.subscribe("a/b", callback).await.unwrap();

    fixture.broker.inject("a/b", "early");

    assert_eq!(fixture.processor.poll(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_maintain_reconnects_dropped_session() {
    let mut fixture = connected_wifi().await;
    fixture.processor.init().await.unwrap();

    fixture.broker.drop_connection();
    assert!(!fixture.processor.is_connected());

    fixture.processor.request_maintenance();
    fixture.processor.maintain().await;

    assert!(fixture.processor.is_connected());
    assert_eq!(fixture.broker.connect_calls(), 2);
    assert_eq!(fixture.broker.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_maintain_is_idle_until_keep_alive_fires() {
    let mut fixture = connected_wifi().await;
    fixture.processor.init().await.unwrap();
    fixture.broker.drop_connection();

    fixture.processor.maintain().await;
    assert_eq!(fixture.broker.connect_calls(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    fixture.processor.maintain().await;
    assert_eq!(fixture.broker.connect_calls(), 2);
    assert!(fixture.processor.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_maintain_stops_session_when_transport_lost() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    manager.init().await.unwrap();
    let mut fixture = session_fixture(manager, MockCertificateStore::complete(), quick_session_settings());
    fixture.processor.init().await.unwrap();

    wifi_state.drop_link();
    fixture.processor.request_maintenance();
    fixture.processor.maintain().await;

    assert_eq!(fixture.processor.phase(), SessionPhase::Uninitialized);
    assert!(!fixture.indicator.is_breathing());
    assert!(wifi_state.is_link_up());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_broker() {
    let mut fixture = connected_wifi().await;
    fixture.processor.init().await.unwrap();

    fixture.processor.disconnect().await;

    assert!(!fixture.processor.is_connected());
    assert!(!fixture.broker.is_connected());
    assert_eq!(fixture.indicator.ends(), 1);
}
