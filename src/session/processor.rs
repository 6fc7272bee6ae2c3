//! Session state machine
//!
//! `UNINITIALIZED → ATTACHING_TRANSPORT → LOADING_CERTS → CONNECTING_MQTT →
//! CONNECTED`. Any failure tears the session back down to `UNINITIALIZED`.
//! Repeated connect failures escalate to a transport restore, and each
//! consecutive restore doubles a cool-down window during which `init` refuses
//! to run.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::broker::{BrokerClient, BrokerConnector, BrokerSettings};
use super::{SessionError, SessionPhase, SessionSettings};
use crate::certificates::CertificateCache;
use crate::peripherals::Indicator;
use crate::registry::{TopicCallback, TopicRegistry};
use crate::timers::PeriodicFlag;
use crate::transport::{TransportClass, TransportManager};

/// Exponential cool-down applied after each transport restore
#[derive(Debug, Clone)]
pub struct RestoreBackoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
    until: Option<Instant>,
}

impl RestoreBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
            until: None,
        }
    }

    /// Start the next, longer cool-down window
    pub fn escalate(&mut self) -> Duration {
        let next = match self.current {
            Some(current) => (current * 2).min(self.max),
            None => self.initial.min(self.max),
        };
        self.current = Some(next);
        self.until = Some(Instant::now() + next);
        next
    }

    /// Time left in the active window, if any
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.until?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.until = None;
    }

    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

/// Owns the broker client and keeps the MQTT session alive over the
/// transport manager's current link
pub struct SessionProcessor {
    manager: TransportManager,
    connector: Arc<dyn BrokerConnector>,
    certificates: CertificateCache,
    registry: TopicRegistry,
    indicator: Arc<dyn Indicator>,
    broker_settings: BrokerSettings,
    settings: SessionSettings,
    broker: Option<Box<dyn BrokerClient>>,
    phase: SessionPhase,
    connect_count: u8,
    backoff: RestoreBackoff,
    keep_alive: PeriodicFlag,
    last_activity: Option<Instant>,
}

impl SessionProcessor {
    pub fn new(
        manager: TransportManager,
        connector: Arc<dyn BrokerConnector>,
        certificates: CertificateCache,
        registry: TopicRegistry,
        indicator: Arc<dyn Indicator>,
        broker_settings: BrokerSettings,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backoff: RestoreBackoff::new(
                settings.restore_backoff_initial,
                settings.restore_backoff_max,
            ),
            keep_alive: PeriodicFlag::new(settings.keep_alive),
            manager,
            connector,
            certificates,
            registry,
            indicator,
            broker_settings,
            settings,
            broker: None,
            phase: SessionPhase::Uninitialized,
            connect_count: 0,
            last_activity: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn manager(&self) -> &TransportManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TransportManager {
        &mut self.manager
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn certificates(&self) -> &CertificateCache {
        &self.certificates
    }

    pub fn client_id(&self) -> &str {
        &self.broker_settings.client_id
    }

    pub fn transport_class(&self) -> TransportClass {
        self.manager.class()
    }

    /// Failed connects since the last success or restore
    pub fn connect_count(&self) -> u8 {
        self.connect_count
    }

    pub fn restore_backoff(&self) -> &RestoreBackoff {
        &self.backoff
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Bring the session up over the manager's current transport
    pub async fn init(&mut self) -> Result<(), SessionError> {
        if self.broker.is_some() {
            self.stop().await;
        }
        self.phase = SessionPhase::Uninitialized;

        if let Some(remaining) = self.backoff.remaining() {
            debug!(remaining_secs = remaining.as_secs(), "Restore cool-down active");
            return Err(SessionError::CoolingDown(remaining));
        }
        if !self.manager.is_connected().await {
            return Err(SessionError::TransportDown);
        }

        let result = match self.attach().await {
            Ok(()) => self.connect().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(error = %e, phase = %self.phase, "Session bring-up failed");
            self.stop().await;
        }
        result
    }

    /// Attach to the current transport's secure client and bind a broker client
    async fn attach(&mut self) -> Result<(), SessionError> {
        self.phase = SessionPhase::AttachingTransport;
        let class = self.manager.class();
        if self.manager.secure_client().is_none() {
            error!(%class, "Transport has no secure client");
            return Err(SessionError::NoSecureClient(class));
        }

        self.phase = SessionPhase::LoadingCerts;
        let bundle = if self.settings.insecure {
            None
        } else {
            Some(self.certificates.load().await?)
        };

        let secure = self
            .manager
            .secure_client()
            .ok_or(SessionError::NoSecureClient(class))?;
        match bundle {
            Some(bundle) => secure.set_certificates(bundle),
            None => secure.set_insecure(true),
        }

        self.broker = Some(self.connector.bind(secure, &self.broker_settings)?);
        debug!(%class, "Broker client bound to transport");
        Ok(())
    }

    /// Run the broker handshake with bounded retries, escalating to a
    /// transport restore after repeated failures
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.connect_count = self.connect_count.saturating_add(1);
        self.keep_alive.start();
        self.phase = SessionPhase::ConnectingMqtt;

        let Some(broker) = self.broker.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        let max_attempts = self.settings.max_connection_attempts;
        let mut connected = false;
        for attempt in 1..=max_attempts {
            if !self.manager.is_connected().await {
                warn!(attempt, "Transport dropped during broker connect");
                return Err(SessionError::TransportDown);
            }
            match broker.connect().await {
                Ok(()) => {
                    info!(attempt, client_id = %self.broker_settings.client_id, "MQTT connected");
                    connected = true;
                    break;
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "MQTT connect attempt failed");
                    sleep(self.settings.attempt_delay).await;
                }
            }
        }

        if !connected {
            if self.connect_count >= self.settings.restoration_threshold {
                self.escalate_restore().await;
            }
            return Err(SessionError::AttemptsExhausted(max_attempts));
        }

        for pattern in self.registry.patterns() {
            if let Err(e) = broker.subscribe(pattern).await {
                warn!(pattern, error = %e, "Re-subscription failed");
            }
        }

        self.connect_count = 0;
        self.backoff.reset();
        self.indicator.start_breathing();
        self.phase = SessionPhase::Connected;
        self.last_activity = Some(Instant::now());
        Ok(())
    }

    async fn escalate_restore(&mut self) {
        error!(
            failures = self.connect_count,
            "Broker unreachable after repeated connects, restoring transport"
        );
        self.connect_count = 0;
        if let Err(e) = self.manager.restore().await {
            warn!(error = %e, "Transport restore failed");
        }
        self.certificates.invalidate();
        let cool_down = self.backoff.escalate();
        warn!(cool_down_secs = cool_down.as_secs(), "Session cool-down started");
    }

    /// Heavy recovery: restore the transport and re-read certificates next time
    pub async fn restore(&mut self) -> Result<(), SessionError> {
        self.stop().await;
        self.certificates.invalidate();
        self.manager.restore().await?;
        Ok(())
    }

    /// Consume the keep-alive flag and repair the session if it dropped
    pub async fn maintain(&mut self) {
        if !self.keep_alive.take() {
            return;
        }
        self.run_maintenance().await;
    }

    /// Raise the keep-alive flag so the next `maintain` runs immediately
    pub fn request_maintenance(&self) {
        self.keep_alive.raise();
    }

    async fn run_maintenance(&mut self) {
        if !self.manager.is_connected().await {
            warn!("Transport lost, stopping session");
            if self.phase == SessionPhase::Connected {
                self.stop().await;
            }
            if let Err(e) = self.manager.maintain().await {
                warn!(error = %e, "Transport maintenance failed");
            }
            return;
        }

        let mqtt_up = self.is_connected();
        if let Err(e) = self.manager.maintain().await {
            warn!(error = %e, "Transport maintenance failed");
        }
        if mqtt_up {
            return;
        }

        info!("MQTT session dropped, reconnecting");
        self.stop().await;
        sleep(self.settings.reconnect_pause).await;
        if let Err(e) = self.init().await {
            warn!(error = %e, "Reconnect failed");
        }
    }

    /// Tear down the broker session, leaving the keep-alive timer running
    pub async fn stop(&mut self) {
        if let Some(mut broker) = self.broker.take() {
            broker.disconnect().await;
        }
        if self.phase == SessionPhase::Connected {
            info!("MQTT session stopped");
        }
        self.indicator.end_breathing();
        self.phase = SessionPhase::Uninitialized;
    }

    /// Stop the keep-alive timer and the session
    pub async fn disconnect(&mut self) {
        self.keep_alive.stop();
        self.stop().await;
    }

    pub fn is_connected(&self) -> bool {
        self.phase == SessionPhase::Connected
            && self.broker.as_ref().is_some_and(|b| b.is_connected())
    }

    /// Dispatch every pending inbound message; returns how many were received
    pub fn poll(&mut self) -> usize {
        if self.phase != SessionPhase::Connected {
            return 0;
        }
        let Some(broker) = self.broker.as_mut() else {
            return 0;
        };

        let messages = broker.drain_inbound();
        for message in &messages {
            self.registry.trigger(&message.topic, &message.payload_str());
        }
        if !messages.is_empty() {
            self.last_activity = Some(Instant::now());
        }
        messages.len()
    }

    pub async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), SessionError> {
        self.publish_bytes(topic, payload.as_bytes()).await
    }

    /// Publish without reconnecting; fails fast while the session is down
    pub async fn publish_bytes(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let broker = self.broker.as_mut().ok_or(SessionError::NotConnected)?;
        broker.publish(topic, payload.to_vec()).await?;
        self.last_activity = Some(Instant::now());
        Ok(())
    }

    /// Register `callback` for `topic`, subscribing at the broker for the
    /// first callback of a pattern
    pub async fn subscribe(
        &mut self,
        topic: &str,
        callback: TopicCallback,
    ) -> Result<(), SessionError> {
        let first = !self.registry.contains(topic);
        self.registry.register(topic, callback)?;
        if !first {
            return Ok(());
        }

        if !self.is_connected() {
            debug!(topic, "Subscription deferred until connected");
            return Ok(());
        }
        let Some(broker) = self.broker.as_mut() else {
            return Ok(());
        };
        if let Err(e) = broker.subscribe(topic).await {
            warn!(topic, error = %e, "Broker subscribe failed, dropping the route");
            self.registry.unregister(topic)?;
            return Err(e);
        }
        Ok(())
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        self.registry.unregister(topic)?;
        if self.is_connected() {
            if let Some(broker) = self.broker.as_mut() {
                broker.unsubscribe(topic).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProcessor")
            .field("phase", &self.phase)
            .field("transport", &self.manager.class())
            .field("connect_count", &self.connect_count)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_up_to_cap() {
        let mut backoff = RestoreBackoff::new(Duration::from_secs(30), Duration::from_secs(100));

        assert_eq!(backoff.escalate(), Duration::from_secs(30));
        assert_eq!(backoff.escalate(), Duration::from_secs(60));
        assert_eq!(backoff.escalate(), Duration::from_secs(100));
        assert_eq!(backoff.escalate(), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_window_expires() {
        let mut backoff = RestoreBackoff::new(Duration::from_secs(30), Duration::from_secs(900));
        backoff.escalate();
        assert!(backoff.remaining().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(backoff.remaining().is_none());
        assert_eq!(backoff.current(), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_window() {
        let mut backoff = RestoreBackoff::new(Duration::from_secs(30), Duration::from_secs(900));
        backoff.escalate();
        backoff.reset();
        assert!(backoff.remaining().is_none());
        assert!(backoff.current().is_none());
    }
}
