//! Transport failover tests
//!
//! Drive the manager over mock links and check which transport ends up
//! selected, and that every abandoned transport is released.

mod test_helpers;

use devicelink::testing::{Journal, MockTransport};
use devicelink::transport::{ConnectionPreference, TransportClass, TransportError};
use test_helpers::manager;

#[tokio::test(start_paused = true)]
async fn test_preferred_transport_wins_when_available() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let (cell, cell_state) = MockTransport::new(TransportClass::Cellular);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![cell, wifi]);

    let class = manager.init().await.unwrap();

    assert_eq!(class, TransportClass::Wifi);
    assert_eq!(manager.class(), TransportClass::Wifi);
    assert!(manager.is_connected().await);
    assert_eq!(wifi_state.init_calls(), 1);
    assert_eq!(cell_state.init_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_falls_through_and_releases_failed_transport() {
    let journal = Journal::new();
    let (wifi, wifi_state) = MockTransport::journaled(TransportClass::Wifi, journal.clone());
    let (cell, cell_state) = MockTransport::journaled(TransportClass::Cellular, journal.clone());
    wifi_state.set_available(false);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi, cell]);

    let class = manager.init().await.unwrap();

    assert_eq!(class, TransportClass::Cellular);
    assert!(!wifi_state.is_powered());
    assert!(cell_state.is_powered());
    assert_eq!(
        journal.entries(),
        vec![
            "WIFI init",
            "WIFI on",
            "WIFI connect",
            "WIFI disconnect",
            "WIFI off",
            "CELLULAR init",
            "CELLULAR on",
            "CELLULAR connect",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_transports_failing_leaves_nothing_powered() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let (cell, cell_state) = MockTransport::new(TransportClass::Cellular);
    wifi_state.set_available(false);
    cell_state.set_available(false);
    let mut manager = manager(ConnectionPreference::CellularPreferred, vec![wifi, cell]);

    let result = manager.init().await;

    assert!(matches!(result, Err(TransportError::AllTransportsFailed)));
    assert_eq!(manager.class(), TransportClass::None);
    assert!(!wifi_state.is_powered());
    assert!(!cell_state.is_powered());
    assert!(!manager.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_revives_current_transport_first() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let (cell, cell_state) = MockTransport::new(TransportClass::Cellular);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi, cell]);
    manager.init().await.unwrap();

    wifi_state.drop_link();
    let class = manager.connect().await.unwrap();

    assert_eq!(class, TransportClass::Wifi);
    assert_eq!(wifi_state.init_calls(), 2);
    assert_eq!(cell_state.init_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_transport_that_stays_down_fails_over() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let (cell, cell_state) = MockTransport::new(TransportClass::Cellular);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi, cell]);
    manager.init().await.unwrap();

    wifi_state.drop_link();
    wifi_state.set_available(false);
    let class = manager.maintain().await.unwrap();

    assert_eq!(class, TransportClass::Cellular);
    assert!(!wifi_state.is_powered());
    assert!(cell_state.is_link_up());
}

#[tokio::test(start_paused = true)]
async fn test_maintain_leaves_healthy_transport_alone() {
    let journal = Journal::new();
    let (wifi, _) = MockTransport::journaled(TransportClass::Wifi, journal.clone());
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    manager.init().await.unwrap();
    journal.clear();

    assert_eq!(manager.maintain().await.unwrap(), TransportClass::Wifi);
    assert!(journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_only_preference_never_tries_other_radio() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let (cell, cell_state) = MockTransport::new(TransportClass::Cellular);
    cell_state.set_available(false);
    let mut manager = manager(ConnectionPreference::CellularOnly, vec![wifi, cell]);

    assert!(manager.init().await.is_err());
    assert_eq!(wifi_state.init_calls(), 0);
    assert_eq!(manager.order(), vec![TransportClass::Cellular]);
}

#[tokio::test(start_paused = true)]
async fn test_power_save_and_restore_need_a_selection() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);

    assert!(matches!(
        manager.power_save(true).await,
        Err(TransportError::NoActiveTransport)
    ));
    assert!(matches!(
        manager.restore().await,
        Err(TransportError::NoActiveTransport)
    ));

    manager.init().await.unwrap();
    manager.power_save(true).await.unwrap();
    manager.restore().await.unwrap();

    assert_eq!(wifi_state.power_save_calls(), vec![true]);
    assert_eq!(wifi_state.restores(), 1);
    assert!(manager.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_clears_selection() {
    let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
    let mut manager = manager(ConnectionPreference::WifiPreferred, vec![wifi]);
    manager.init().await.unwrap();

    manager.disconnect().await;

    assert_eq!(manager.class(), TransportClass::None);
    assert!(!wifi_state.is_powered());
    assert!(manager.network_time().await.is_none());
}
