//! rumqttc-backed broker client
//!
//! Each bind creates a fresh `MqttOptions` from the transport's secure client.
//! `connect` spawns the rumqttc event loop on its own task and only returns
//! once the broker has acknowledged the session. The event loop task reports
//! connection state over a `watch` channel and forwards inbound publishes over
//! a bounded `mpsc` queue drained by the session processor.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport as MqttTransport,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::broker::{BrokerClient, BrokerConnector, BrokerSettings, InboundMessage};
use super::SessionError;
use crate::secure::{Credentials, SecureClient};

/// rumqttc refuses keep-alive intervals shorter than this
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
/// Request queue capacity between `AsyncClient` and the event loop
const REQUEST_CAPACITY: usize = 10;
/// How long a graceful disconnect may take before the event loop is aborted
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Connection state reported by the event loop task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(String),
}

/// What the event loop should do with one rumqttc event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    ConnectionRefused(String),
    MessageReceived(InboundMessage),
    Disconnected,
    Other,
}

/// Classify a rumqttc event
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                EventRoute::ConnectionAcknowledged
            } else {
                EventRoute::ConnectionRefused(format!("{:?}", ack.code))
            }
        }
        Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived(
            InboundMessage::new(publish.topic.clone(), publish.payload.clone()),
        ),
        Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
        _ => EventRoute::Other,
    }
}

/// Build rumqttc options for a broker bound to `secure`
pub fn configure_mqtt_options(
    secure: &SecureClient,
    settings: &BrokerSettings,
) -> Result<MqttOptions, SessionError> {
    if settings.host.is_empty() {
        return Err(SessionError::InvalidBroker("empty host".to_string()));
    }
    if settings.client_id.is_empty() {
        return Err(SessionError::InvalidBroker("empty client id".to_string()));
    }

    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(settings.keep_alive.max(MIN_KEEP_ALIVE));
    options.set_clean_session(settings.clean_session);

    if let Some(username) = &settings.username {
        let password = settings.password.clone().unwrap_or_default();
        options.set_credentials(username.clone(), password);
    }

    match secure.credentials() {
        Credentials::Certificates(bundle) => {
            let tls = TlsConfiguration::Simple {
                ca: bundle.ca.clone(),
                alpn: None,
                client_auth: Some((bundle.certificate.clone(), bundle.private_key.clone())),
            };
            options.set_transport(MqttTransport::tls_with_config(tls));
        }
        Credentials::PreSharedKey { .. } => {
            return Err(SessionError::UnsupportedCredentials(
                "pre-shared keys are not available over rumqttc",
            ));
        }
        Credentials::None if secure.is_insecure() => {
            debug!("Binding broker client without TLS");
        }
        Credentials::None => {
            return Err(SessionError::HandshakeFailed(
                "no TLS credentials on secure client".to_string(),
            ));
        }
    }

    Ok(options)
}

/// Connector producing [`MqttBroker`] clients
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl BrokerConnector for MqttConnector {
    fn bind(
        &self,
        secure: &SecureClient,
        settings: &BrokerSettings,
    ) -> Result<Box<dyn BrokerClient>, SessionError> {
        Ok(Box::new(MqttBroker::new(secure, settings)?))
    }
}

/// Broker session over rumqttc
pub struct MqttBroker {
    options: MqttOptions,
    handshake_timeout: Duration,
    inbound_capacity: usize,
    client: Option<AsyncClient>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl MqttBroker {
    pub fn new(secure: &SecureClient, settings: &BrokerSettings) -> Result<Self, SessionError> {
        Ok(Self {
            options: configure_mqtt_options(secure, settings)?,
            handshake_timeout: secure.handshake_timeout(),
            inbound_capacity: settings.inbound_capacity.max(1),
            client: None,
            state_rx: None,
            shutdown_tx: None,
            inbound_rx: None,
            event_loop_handle: None,
        })
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(SessionError::HandshakeFailed(reason.clone()));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(SessionError::HandshakeFailed(
                        "event loop stopped".to_string(),
                    ));
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(SessionError::HandshakeTimeout(timeout)),
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("MQTT event loop shutting down");
                        break;
                    }
                }
                event = event_loop.poll() => match event {
                    Ok(event) => match route_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            info!("Broker acknowledged session");
                            let _ = state_tx.send(ConnectionState::Connected);
                        }
                        EventRoute::ConnectionRefused(reason) => {
                            warn!(%reason, "Broker refused session");
                            let _ = state_tx.send(ConnectionState::Disconnected(reason));
                            break;
                        }
                        EventRoute::MessageReceived(message) => {
                            debug!(topic = %message.topic, bytes = message.payload.len(), "Message received");
                            if inbound_tx.try_send(message).is_err() {
                                warn!("Inbound queue full, dropping message");
                            }
                        }
                        EventRoute::Disconnected => {
                            warn!("Broker closed the session");
                            let _ = state_tx.send(ConnectionState::Disconnected(
                                "broker sent DISCONNECT".to_string(),
                            ));
                            break;
                        }
                        EventRoute::Other => {}
                    },
                    Err(e) => {
                        error!(error = %e, "MQTT event loop error");
                        let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                        break;
                    }
                }
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(mut handle) = self.event_loop_handle.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        self.client = None;
        self.state_rx = None;
        self.inbound_rx = None;
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.teardown().await;

        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_capacity);

        let (host, port) = self.options.broker_address();
        debug!(%host, port, client_id = %self.options.client_id(), "Starting MQTT handshake");

        let span = crate::mqtt_span!(operation = "event_loop", %host, port);
        self.event_loop_handle = Some(tokio::spawn(
            Self::run_event_loop(event_loop, state_tx, inbound_tx, shutdown_rx).instrument(span),
        ));
        self.shutdown_tx = Some(shutdown_tx);

        if let Err(e) =
            Self::wait_for_connection_confirmation(state_rx.clone(), self.handshake_timeout).await
        {
            self.teardown().await;
            return Err(e);
        }

        self.client = Some(client);
        self.state_rx = Some(state_rx);
        self.inbound_rx = Some(inbound_rx);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let client = self.client.as_ref().ok_or(SessionError::NotConnected)?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| SessionError::PublishFailed(Box::new(e)))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let client = self.client.as_ref().ok_or(SessionError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| SessionError::SubscriptionFailed(Box::new(e)))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let client = self.client.as_ref().ok_or(SessionError::NotConnected)?;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| SessionError::SubscriptionFailed(Box::new(e)))
    }

    fn drain_inbound(&mut self) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        if let Some(rx) = self.inbound_rx.as_mut() {
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }
        messages
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.as_ref() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "MQTT disconnect request failed");
            }
        }
        self.teardown().await;
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
