//! Multi-transport failover
//!
//! The manager owns every configured transport, ordered by the connection
//! preference, and keeps at most one of them powered and selected as
//! `current`. Every transport it gives up on is disconnected and powered off
//! before the next one is tried.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{ConnectionPreference, Link, NetworkTime, Transport, TransportClass, TransportError};
use crate::secure::SecureClient;

/// Default wait after the current transport fails to come back
pub const DEFAULT_FALLTHROUGH_PAUSE: Duration = Duration::from_secs(5);
/// Default wait between failed candidates
pub const DEFAULT_SWITCH_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct TransportManager {
    links: Vec<Link>,
    preference: ConnectionPreference,
    current: Option<usize>,
    fallthrough_pause: Duration,
    switch_pause: Duration,
}

impl TransportManager {
    /// Order `links` by `preference`, dropping classes the preference excludes
    pub fn new(preference: ConnectionPreference, links: Vec<Link>) -> Self {
        let mut ranked: Vec<(usize, Link)> = Vec::with_capacity(links.len());
        for link in links {
            match preference.rank(link.class()) {
                Some(rank) => ranked.push((rank, link)),
                None => warn!(
                    class = %link.class(),
                    ?preference,
                    "Transport excluded by connection preference"
                ),
            }
        }
        ranked.sort_by_key(|(rank, _)| *rank);

        Self {
            links: ranked.into_iter().map(|(_, link)| link).collect(),
            preference,
            current: None,
            fallthrough_pause: DEFAULT_FALLTHROUGH_PAUSE,
            switch_pause: DEFAULT_SWITCH_PAUSE,
        }
    }

    pub fn with_pauses(mut self, fallthrough: Duration, switch: Duration) -> Self {
        self.fallthrough_pause = fallthrough;
        self.switch_pause = switch;
        self
    }

    pub fn preference(&self) -> ConnectionPreference {
        self.preference
    }

    /// Transport classes in the order they are tried
    pub fn order(&self) -> Vec<TransportClass> {
        self.links.iter().map(Transport::class).collect()
    }

    /// Class of the selected transport, `NONE` when nothing is selected
    pub fn class(&self) -> TransportClass {
        self.current_link()
            .map(Transport::class)
            .unwrap_or(TransportClass::None)
    }

    fn current_link(&self) -> Option<&Link> {
        self.current.and_then(|i| self.links.get(i))
    }

    fn current_link_mut(&mut self) -> Option<&mut Link> {
        self.current.and_then(|i| self.links.get_mut(i))
    }

    /// Forget any selection and run the failover search from scratch
    pub async fn init(&mut self) -> Result<TransportClass, TransportError> {
        self.current = None;
        self.connect().await
    }

    /// Make sure some transport is connected, failing over when needed
    pub async fn connect(&mut self) -> Result<TransportClass, TransportError> {
        if let Some(index) = self.current {
            let link = &mut self.links[index];
            if link.is_connected().await {
                return Ok(link.class());
            }

            let class = link.class();
            warn!(%class, "Current transport lost, re-initializing");
            link.disconnect().await;
            if let Err(e) = link.off().await {
                debug!(%class, error = %e, "Power off failed");
            }
            if reinit(link).await {
                info!(%class, "Current transport recovered");
                return Ok(class);
            }

            self.disconnect().await;
            sleep(self.fallthrough_pause).await;
        }

        for index in 0..self.links.len() {
            let link = &mut self.links[index];
            let class = link.class();
            debug!(%class, "Trying transport");
            if reinit(link).await {
                info!(%class, "Transport connected");
                self.current = Some(index);
                return Ok(class);
            }

            warn!(%class, "Transport failed to connect");
            link.disconnect().await;
            if let Err(e) = link.off().await {
                debug!(%class, error = %e, "Power off failed");
            }
            if index + 1 < self.links.len() {
                sleep(self.switch_pause).await;
            }
        }

        warn!("No transport could connect");
        Err(TransportError::AllTransportsFailed)
    }

    /// Disconnect and power off the current transport and clear the selection
    pub async fn disconnect(&mut self) {
        if let Some(link) = self.current_link_mut() {
            let class = link.class();
            link.disconnect().await;
            if let Err(e) = link.off().await {
                debug!(%class, error = %e, "Power off failed");
            }
            info!(%class, "Transport released");
        }
        self.current = None;
    }

    pub async fn is_connected(&mut self) -> bool {
        match self.current_link_mut() {
            Some(link) => link.is_connected().await,
            None => false,
        }
    }

    /// Power on every transport
    pub async fn on(&mut self) -> Result<(), TransportError> {
        let mut result = Ok(());
        for link in &mut self.links {
            if let Err(e) = link.on().await {
                warn!(class = %link.class(), error = %e, "Power on failed");
                result = Err(e);
            }
        }
        result
    }

    /// Power off every transport and clear the selection
    pub async fn off(&mut self) -> Result<(), TransportError> {
        let mut result = Ok(());
        for link in &mut self.links {
            link.disconnect().await;
            if let Err(e) = link.off().await {
                warn!(class = %link.class(), error = %e, "Power off failed");
                result = Err(e);
            }
        }
        self.current = None;
        result
    }

    pub async fn keep_alive(&mut self, max_retries: u8) -> Result<(), TransportError> {
        match self.current_link_mut() {
            Some(link) => link.keep_alive(max_retries).await,
            None => Err(TransportError::NoActiveTransport),
        }
    }

    /// Health probe: no-op while connected, otherwise repair the current
    /// transport or fail over to another one
    pub async fn maintain(&mut self) -> Result<TransportClass, TransportError> {
        if let Some(link) = self.current_link_mut() {
            if link.is_connected().await {
                return Ok(link.class());
            }
            if link.maintain().await.is_ok() && link.is_connected().await {
                return Ok(link.class());
            }
        }
        self.disconnect().await;
        self.connect().await
    }

    /// Borrow the TLS settings of the current transport
    pub fn secure_client(&mut self) -> Option<&mut SecureClient> {
        self.current_link_mut().and_then(Transport::secure_client)
    }

    pub async fn network_time(&mut self) -> Option<NetworkTime> {
        match self.current_link_mut() {
            Some(link) => link.network_time().await,
            None => None,
        }
    }

    pub async fn power_save(&mut self, enabled: bool) -> Result<(), TransportError> {
        match self.current_link_mut() {
            Some(link) => link.power_save(enabled).await,
            None => Err(TransportError::NoActiveTransport),
        }
    }

    /// Heavy recovery of the current transport
    pub async fn restore(&mut self) -> Result<(), TransportError> {
        match self.current_link_mut() {
            Some(link) => {
                warn!(class = %link.class(), "Restoring transport");
                link.restore().await
            }
            None => Err(TransportError::NoActiveTransport),
        }
    }

    /// Typed access to an owned transport, e.g. to add a Wi-Fi network
    pub fn transport_mut(&mut self, class: TransportClass) -> Option<&mut Link> {
        self.links.iter_mut().find(|link| link.class() == class)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }
}

async fn reinit(link: &mut Link) -> bool {
    match link.init().await {
        Ok(()) => link.is_connected().await,
        Err(e) => {
            debug!(class = %link.class(), error = %e, "Transport init failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockTransport;

    fn external(mock: MockTransport) -> Link {
        Link::External(Box::new(mock))
    }

    #[test]
    fn test_links_ordered_by_preference() {
        let (wifi, _) = MockTransport::new(TransportClass::Wifi);
        let (cell, _) = MockTransport::new(TransportClass::Cellular);
        let (eth, _) = MockTransport::new(TransportClass::Ethernet);

        let manager = TransportManager::new(
            ConnectionPreference::CellularPreferred,
            vec![external(eth), external(wifi), external(cell)],
        );

        assert_eq!(
            manager.order(),
            vec![
                TransportClass::Cellular,
                TransportClass::Wifi,
                TransportClass::Ethernet
            ]
        );
    }

    #[test]
    fn test_only_preference_drops_other_links() {
        let (wifi, _) = MockTransport::new(TransportClass::Wifi);
        let (cell, _) = MockTransport::new(TransportClass::Cellular);

        let manager = TransportManager::new(
            ConnectionPreference::WifiOnly,
            vec![external(cell), external(wifi)],
        );

        assert_eq!(manager.order(), vec![TransportClass::Wifi]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_connected_without_selection() {
        let (wifi, _) = MockTransport::new(TransportClass::Wifi);
        let mut manager =
            TransportManager::new(ConnectionPreference::WifiPreferred, vec![external(wifi)]);

        assert!(!manager.is_connected().await);
        assert_eq!(manager.class(), TransportClass::None);
        assert!(manager.secure_client().is_none());
        assert!(matches!(
            manager.restore().await,
            Err(TransportError::NoActiveTransport)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_when_current_connected() {
        let (wifi, state) = MockTransport::new(TransportClass::Wifi);
        let mut manager =
            TransportManager::new(ConnectionPreference::WifiPreferred, vec![external(wifi)]);
        manager.connect().await.unwrap();
        let inits = state.init_calls();

        let class = manager.connect().await.unwrap();

        assert_eq!(class, TransportClass::Wifi);
        assert_eq!(state.init_calls(), inits);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintain_fails_over_when_current_drops() {
        let (wifi, wifi_state) = MockTransport::new(TransportClass::Wifi);
        let (cell, _) = MockTransport::new(TransportClass::Cellular);
        let mut manager = TransportManager::new(
            ConnectionPreference::WifiPreferred,
            vec![external(wifi), external(cell)],
        );
        manager.connect().await.unwrap();

        wifi_state.set_available(false);
        wifi_state.drop_link();
        let class = manager.maintain().await.unwrap();

        assert_eq!(class, TransportClass::Cellular);
        assert!(!wifi_state.is_powered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_mut_finds_by_class() {
        let (wifi, _) = MockTransport::new(TransportClass::Wifi);
        let mut manager =
            TransportManager::new(ConnectionPreference::WifiPreferred, vec![external(wifi)]);

        assert!(manager.transport_mut(TransportClass::Wifi).is_some());
        assert!(manager.transport_mut(TransportClass::Cellular).is_none());
    }
}
