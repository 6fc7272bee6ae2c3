//! Function/variable RPC protocol
//!
//! Inbound invocations arrive on `{prefix}/Function/{device}/#` and
//! `{prefix}/Variable/{device}/#` as `.../{name}/{callId}`. Registry callbacks
//! only queue them; [`RegistrationProtocol::poll`] answers them from the
//! owning task. Once per session bring-up, after the registration delay, the
//! device announces its functions and variables on `{prefix}/Register/{device}`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::topics::{call_id, topic_key, TopicLayout};
use super::variables::{IntoBinding, VariableBinding};
use super::RegistrationError;
use crate::registry::TopicCallback;
use crate::session::{SessionError, SessionProcessor};
use crate::timers::OneShotFlag;

/// Default maximum number of functions
pub const DEFAULT_MAX_FUNCTIONS: usize = 20;

/// Callable function: receives the request payload, returns the result value
pub type FunctionCallback = Arc<dyn Fn(&str) -> i32 + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    /// Delay between session bring-up and the registration publish
    pub delay: Duration,
    pub max_functions: usize,
    /// How often `maintain` forwards to the session keep-alive
    pub maintenance_interval: Duration,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_functions: DEFAULT_MAX_FUNCTIONS,
            maintenance_interval: Duration::from_secs(1),
        }
    }
}

/// Announcement of everything the device exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationMessage {
    pub id: String,
    pub functions: Vec<String>,
    pub variables: Vec<String>,
    #[serde(rename = "functionCount")]
    pub function_count: usize,
    #[serde(rename = "variableCount")]
    pub variable_count: usize,
}

/// Reply to a function call or variable read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    pub value: Value,
    pub key: String,
    pub id: String,
    pub request: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvocationKind {
    Function,
    Variable,
}

#[derive(Debug)]
struct Invocation {
    kind: InvocationKind,
    topic: String,
    payload: String,
}

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() || name.contains(['/', '+', '#']) {
        return Err(RegistrationError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub struct RegistrationProtocol {
    processor: SessionProcessor,
    layout: TopicLayout,
    settings: RegistrationSettings,
    functions: Vec<(String, FunctionCallback)>,
    variables: Vec<(String, VariableBinding)>,
    invocations_tx: mpsc::UnboundedSender<Invocation>,
    invocations_rx: mpsc::UnboundedReceiver<Invocation>,
    registration_timer: OneShotFlag,
    registered: bool,
    last_alive: Option<Instant>,
    /// Invocation topics this protocol has already routed
    routes: Vec<String>,
}

impl RegistrationProtocol {
    pub fn new(
        processor: SessionProcessor,
        layout: TopicLayout,
        settings: RegistrationSettings,
    ) -> Self {
        let (invocations_tx, invocations_rx) = mpsc::unbounded_channel();
        Self {
            processor,
            layout,
            settings,
            functions: Vec::new(),
            variables: Vec::new(),
            invocations_tx,
            invocations_rx,
            registration_timer: OneShotFlag::new(),
            registered: false,
            last_alive: None,
            routes: Vec::new(),
        }
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    pub fn processor(&self) -> &SessionProcessor {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut SessionProcessor {
        &mut self.processor
    }

    /// Bring the session up and schedule the registration announcement
    pub async fn init(&mut self) -> Result<(), RegistrationError> {
        self.registered = false;
        self.registration_timer.disarm();

        self.install_routes().await?;
        self.processor.init().await?;

        self.registration_timer.arm(self.settings.delay);
        debug!(
            delay_secs = self.settings.delay.as_secs(),
            "Registration scheduled"
        );
        Ok(())
    }

    /// Route the protocol's inbound topics into the invocation queue.
    ///
    /// Done before the session connects so the connect-time re-subscription
    /// covers them. Each route is installed once per protocol; an application
    /// callback already held on the same pattern keeps firing alongside it.
    async fn install_routes(&mut self) -> Result<(), SessionError> {
        let routes = [
            (InvocationKind::Function, self.layout.function_topic()),
            (InvocationKind::Variable, self.layout.variable_topic()),
        ];
        let registry = self.processor.registry();
        self.routes.retain(|topic| registry.contains(topic));
        for (kind, topic) in routes {
            if self.routes.contains(&topic) {
                continue;
            }
            let tx = self.invocations_tx.clone();
            let callback: TopicCallback = Arc::new(move |topic: &str, payload: &str| {
                let _ = tx.send(Invocation {
                    kind,
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                });
            });
            self.processor.subscribe(&topic, callback).await?;
            self.routes.push(topic);
        }
        Ok(())
    }

    /// Register a callable function; re-registering a name replaces it
    pub fn function(
        &mut self,
        name: &str,
        callback: FunctionCallback,
    ) -> Result<(), RegistrationError> {
        validate_name(name)?;
        if let Some(entry) = self.functions.iter_mut().find(|(n, _)| n == name) {
            entry.1 = callback;
            return Ok(());
        }
        if self.functions.len() >= self.settings.max_functions {
            warn!(name, limit = self.settings.max_functions, "Function limit reached");
            return Err(RegistrationError::FunctionLimit(self.settings.max_functions));
        }
        self.functions.push((name.to_string(), callback));
        Ok(())
    }

    /// Expose a variable for reading; re-registering a name replaces it
    pub fn variable(&mut self, name: &str, variable: &impl IntoBinding) -> Result<(), RegistrationError> {
        self.variable_binding(name, variable.binding())
    }

    pub fn variable_binding(
        &mut self,
        name: &str,
        binding: VariableBinding,
    ) -> Result<(), RegistrationError> {
        validate_name(name)?;
        if let Some(entry) = self.variables.iter_mut().find(|(n, _)| n == name) {
            entry.1 = binding;
            return Ok(());
        }
        self.variables.push((name.to_string(), binding));
        Ok(())
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn registration_message(&self) -> RegistrationMessage {
        RegistrationMessage {
            id: self.layout.device_id().to_string(),
            functions: self.functions.iter().map(|(n, _)| n.clone()).collect(),
            variables: self.variables.iter().map(|(n, _)| n.clone()).collect(),
            function_count: self.functions.len(),
            variable_count: self.variables.len(),
        }
    }

    /// Dispatch inbound traffic, answer invocations, and publish the
    /// registration once its timer has fired
    pub async fn poll(&mut self) {
        self.processor.poll();

        while let Ok(invocation) = self.invocations_rx.try_recv() {
            self.answer(invocation).await;
        }

        if !self.registered && self.registration_timer.has_fired() {
            self.send_registry().await;
        }
    }

    async fn answer(&mut self, invocation: Invocation) {
        let Some(key) = topic_key(&invocation.topic) else {
            warn!(topic = %invocation.topic, "Malformed invocation topic");
            return;
        };
        let request = call_id(&invocation.topic);

        let (value, reply_topic) = match invocation.kind {
            InvocationKind::Function => {
                let Some((_, callback)) = self.functions.iter().find(|(n, _)| n == key) else {
                    warn!(key, "Function not found");
                    return;
                };
                let result = callback(&invocation.payload);
                (
                    Value::from(result),
                    self.layout.function_result_topic(key, request),
                )
            }
            InvocationKind::Variable => {
                let Some((_, binding)) = self.variables.iter().find(|(n, _)| n == key) else {
                    warn!(key, "Variable not found");
                    return;
                };
                (
                    binding.to_json(),
                    self.layout.variable_result_topic(key, request),
                )
            }
        };

        let result = InvocationResult {
            value,
            key: key.to_string(),
            id: self.layout.device_id().to_string(),
            request: request.to_string(),
        };
        let payload = match serde_json::to_string(&result) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode invocation result");
                return;
            }
        };
        if let Err(e) = self.processor.publish(&reply_topic, &payload).await {
            warn!(topic = %reply_topic, error = %e, "Failed to publish invocation result");
        }
    }

    async fn send_registry(&mut self) {
        let message = self.registration_message();
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode registration");
                return;
            }
        };
        let topic = self.layout.register_topic();
        match self.processor.publish(&topic, &payload).await {
            Ok(()) => {
                info!(
                    functions = message.function_count,
                    variables = message.variable_count,
                    "Device registered"
                );
                self.registered = true;
                self.registration_timer.disarm();
            }
            Err(e) => warn!(error = %e, "Registration publish failed, retrying"),
        }
    }

    /// True once the registration has been published on a live session
    pub fn ready(&self) -> bool {
        self.registered && self.processor.is_connected()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Forward to the session keep-alive at most once per maintenance interval
    pub async fn maintain(&mut self) {
        let now = Instant::now();
        let due = self
            .last_alive
            .map_or(true, |at| now.duration_since(at) >= self.settings.maintenance_interval);
        if !due {
            return;
        }
        self.last_alive = Some(now);
        self.processor.maintain().await;
    }

    pub fn is_connected(&self) -> bool {
        self.processor.is_connected()
    }

    pub async fn subscribe(
        &mut self,
        topic: &str,
        callback: TopicCallback,
    ) -> Result<(), RegistrationError> {
        Ok(self.processor.subscribe(topic, callback).await?)
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<(), RegistrationError> {
        Ok(self.processor.unsubscribe(topic).await?)
    }

    pub async fn publish_topic(&mut self, topic: &str, payload: &str) -> Result<(), RegistrationError> {
        Ok(self.processor.publish(topic, payload).await?)
    }

    pub async fn publish_bytes(&mut self, topic: &str, payload: &[u8]) -> Result<(), RegistrationError> {
        Ok(self.processor.publish_bytes(topic, payload).await?)
    }

    /// Stop the session and forget the registration
    pub async fn disconnect(&mut self) {
        self.registration_timer.disarm();
        self.registered = false;
        self.processor.disconnect().await;
    }
}

impl std::fmt::Debug for RegistrationProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationProtocol")
            .field("layout", &self.layout)
            .field("functions", &self.functions.len())
            .field("variables", &self.variables.len())
            .field("registered", &self.registered)
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}
