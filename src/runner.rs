//! Connection runner and the application-facing [`DeviceLink`] handle
//!
//! A single tokio task owns the whole stack (protocol, session, transports)
//! and sequences every transition. Each tick it drains queued commands,
//! advances the staged bring-up (transport first, then session), keeps the
//! session alive, pumps inbound traffic, and publishes a [`LinkStatus`]
//! snapshot. [`DeviceLink`] talks to it by message passing and reports
//! failures as booleans after logging them.
//!
//! The owned state lives behind an async mutex held by the runner for its
//! whole life. While no runner is running, commands are applied directly, and
//! a relaunched runner picks the same state up again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn, Instrument};

use crate::certificates::{CertificateCache, CertificateStore};
use crate::config::DeviceConfig;
use crate::error::{LinkError, LinkResult};
use crate::observability::init_device_logging;
use crate::peripherals::{Indicator, Watchdog};
use crate::registration::{
    FunctionCallback, IntoBinding, RegistrationProtocol, VariableBinding,
};
use crate::registry::TopicCallback;
use crate::session::{BrokerConnector, SessionPhase, SessionProcessor};
use crate::transport::{
    CellularTransport, Link, NetworkTime, TransportClass, TransportError, TransportManager,
};

/// Runner pacing
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub tick: Duration,
    /// Pause between failed bring-up attempts
    pub init_retry: Duration,
    /// A step running longer than this, or no progress for this long, means stuck
    pub stuck_threshold: Duration,
    pub command_capacity: usize,
    /// Longest a call waits for a busy runner; an expired call is never applied
    pub command_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            init_retry: Duration::from_millis(500),
            stuck_threshold: Duration::from_secs(600),
            command_capacity: 32,
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot published by the runner after every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub ready: bool,
    pub transport: TransportClass,
    pub phase: SessionPhase,
}

type Reply<T> = oneshot::Sender<LinkResult<T>>;

enum Command {
    Subscribe {
        topic: String,
        callback: TopicCallback,
        reply: Reply<()>,
    },
    Unsubscribe {
        topic: String,
        reply: Reply<()>,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        reply: Reply<()>,
    },
    Function {
        name: String,
        callback: FunctionCallback,
        reply: Reply<()>,
    },
    Variable {
        name: String,
        binding: VariableBinding,
        reply: Reply<()>,
    },
    AddNetwork {
        ssid: String,
        password: String,
        reply: Reply<()>,
    },
    SetApn {
        apn: String,
        reply: Reply<()>,
    },
    SetSimPin {
        pin: Option<String>,
        reply: Reply<()>,
    },
    PowerSave {
        enabled: bool,
        reply: Reply<()>,
    },
    NetworkTime {
        reply: Reply<Option<NetworkTime>>,
    },
}

impl Command {
    /// The caller gave up waiting for an answer
    fn is_abandoned(&self) -> bool {
        match self {
            Command::Subscribe { reply, .. }
            | Command::Unsubscribe { reply, .. }
            | Command::Publish { reply, .. }
            | Command::Function { reply, .. }
            | Command::Variable { reply, .. }
            | Command::AddNetwork { reply, .. }
            | Command::SetApn { reply, .. }
            | Command::SetSimPin { reply, .. }
            | Command::PowerSave { reply, .. } => reply.is_closed(),
            Command::NetworkTime { reply } => reply.is_closed(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Subscribe { .. } => "subscribe",
            Command::Unsubscribe { .. } => "unsubscribe",
            Command::Publish { .. } => "publish",
            Command::Function { .. } => "function",
            Command::Variable { .. } => "variable",
            Command::AddNetwork { .. } => "add_network",
            Command::SetApn { .. } => "set_apn",
            Command::SetSimPin { .. } => "set_sim_pin",
            Command::PowerSave { .. } => "power_save",
            Command::NetworkTime { .. } => "network_time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Transport,
    Session,
    Running,
}

/// Last time the runner made progress
#[derive(Debug)]
struct AliveStamp {
    base: Instant,
    last_ms: AtomicU64,
}

impl AliveStamp {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_ms
            .store(self.base.elapsed().as_millis() as u64, Ordering::Release);
    }

    fn since(&self) -> Duration {
        let now = self.base.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Acquire)))
    }
}

#[derive(Clone)]
struct RunnerContext {
    settings: RunnerSettings,
    alive: Arc<AliveStamp>,
    watchdog: Arc<dyn Watchdog>,
}

struct RunnerCore {
    protocol: RegistrationProtocol,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<LinkStatus>,
    stage: Stage,
    next_attempt: Option<Instant>,
    launches: u32,
}

impl RunnerCore {
    async fn step(&mut self, settings: &RunnerSettings) {
        self.drain_commands().await;
        if self.stage != Stage::Running {
            self.advance_bring_up(settings).await;
            self.drain_commands().await;
        }
        if self.stage == Stage::Running {
            self.protocol.maintain().await;
        }
        self.protocol.poll().await;
    }

    async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            if command.is_abandoned() {
                debug!(command = command.name(), "Dropping call that timed out");
                continue;
            }
            self.handle(command).await;
        }
    }

    async fn advance_bring_up(&mut self, settings: &RunnerSettings) {
        if self.next_attempt.is_some_and(|at| Instant::now() < at) {
            return;
        }

        match self.stage {
            Stage::Transport => {
                let manager = self.protocol.processor_mut().manager_mut();
                match manager.init().await {
                    Ok(class) => {
                        info!(%class, "Transport up, starting session");
                        self.stage = Stage::Session;
                        self.next_attempt = None;
                    }
                    Err(e) => {
                        info!(error = %e, "Transport init failed, retrying");
                        self.next_attempt = Some(Instant::now() + settings.init_retry);
                    }
                }
            }
            Stage::Session => {
                if !self.protocol.processor_mut().manager_mut().is_connected().await {
                    warn!("Transport dropped before session start");
                    self.stage = Stage::Transport;
                    return;
                }
                match self.protocol.init().await {
                    Ok(()) => {
                        info!("Connection started");
                        self.stage = Stage::Running;
                        self.next_attempt = None;
                    }
                    Err(e) => {
                        let error = LinkError::from(e);
                        if error.is_transient() {
                            info!(error = %error, "Session init failed, retrying");
                        } else {
                            error!(error = %error, "Session init failed");
                        }
                        self.next_attempt = Some(Instant::now() + settings.init_retry);
                    }
                }
            }
            Stage::Running => {}
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                topic,
                callback,
                reply,
            } => {
                let result = self.protocol.subscribe(&topic, callback).await;
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::Unsubscribe { topic, reply } => {
                let result = self.protocol.unsubscribe(&topic).await;
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::Publish {
                topic,
                payload,
                reply,
            } => {
                let result = self.protocol.publish_bytes(&topic, &payload).await;
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::Function {
                name,
                callback,
                reply,
            } => {
                let result = self.protocol.function(&name, callback);
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::Variable {
                name,
                binding,
                reply,
            } => {
                let result = self.protocol.variable_binding(&name, binding);
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::AddNetwork {
                ssid,
                password,
                reply,
            } => {
                let manager = self.protocol.processor_mut().manager_mut();
                let result = match manager
                    .transport_mut(TransportClass::Wifi)
                    .and_then(Link::as_wifi_mut)
                {
                    Some(wifi) => wifi.add_network(ssid, password),
                    None => Err(TransportError::Unsupported(TransportClass::Wifi)),
                };
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::SetApn { apn, reply } => {
                let result = match self.cellular() {
                    Some(cellular) => cellular.set_apn(apn).await,
                    None => Err(TransportError::Unsupported(TransportClass::Cellular)),
                };
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::SetSimPin { pin, reply } => {
                let result = match self.cellular() {
                    Some(cellular) => cellular.set_sim_pin(pin).await,
                    None => Err(TransportError::Unsupported(TransportClass::Cellular)),
                };
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::PowerSave { enabled, reply } => {
                let manager = self.protocol.processor_mut().manager_mut();
                let result = manager.power_save(enabled).await;
                let _ = reply.send(result.map_err(LinkError::from));
            }
            Command::NetworkTime { reply } => {
                let manager = self.protocol.processor_mut().manager_mut();
                let _ = reply.send(Ok(manager.network_time().await));
            }
        }
    }

    fn cellular(&mut self) -> Option<&mut CellularTransport> {
        self.protocol
            .processor_mut()
            .manager_mut()
            .transport_mut(TransportClass::Cellular)
            .and_then(Link::as_cellular_mut)
    }

    /// Drop the session and every transport; bring-up starts over
    async fn teardown(&mut self) {
        self.protocol.disconnect().await;
        let manager = self.protocol.processor_mut().manager_mut();
        manager.disconnect().await;
        if let Err(e) = manager.off().await {
            warn!(error = %e, "Transport power off failed");
        }
        self.stage = Stage::Transport;
        self.next_attempt = None;
    }

    fn publish_status(&self) {
        let processor = self.protocol.processor();
        let status = LinkStatus {
            connected: self.protocol.is_connected(),
            ready: self.protocol.ready(),
            transport: processor.transport_class(),
            phase: processor.phase(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

async fn run(core: Arc<Mutex<RunnerCore>>, ctx: RunnerContext, mut shutdown: watch::Receiver<bool>) {
    let mut core = core.lock_owned().await;
    core.launches += 1;
    if core.launches > 1 {
        warn!(launch = core.launches, "Runner relaunched, rebuilding connection");
        core.teardown().await;
    }
    info!("Runner started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        ctx.alive.touch();
        ctx.watchdog.feed();

        if timeout(ctx.settings.stuck_threshold, core.step(&ctx.settings))
            .await
            .is_err()
        {
            error!(
                threshold_secs = ctx.settings.stuck_threshold.as_secs(),
                "Runner stuck, rebuilding connection"
            );
            core.teardown().await;
        }
        core.publish_status();

        tokio::select! {
            _ = sleep(ctx.settings.tick) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    core.drain_commands().await;
    core.teardown().await;
    core.publish_status();
    info!("Runner stopped");
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn report(operation: &str, result: LinkResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(operation, error = %e, "Device link operation failed");
            false
        }
    }
}

struct Shared {
    device_id: String,
    core: Arc<Mutex<RunnerCore>>,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<LinkStatus>,
    shutdown: watch::Sender<bool>,
    task: StdMutex<Option<JoinHandle<()>>>,
    ctx: RunnerContext,
}

/// Cloneable application handle to the connection runner
#[derive(Clone)]
pub struct DeviceLink {
    inner: Arc<Shared>,
}

impl DeviceLink {
    /// Wrap a fully assembled protocol stack; nothing runs until [`start`](Self::start)
    pub fn new(
        protocol: RegistrationProtocol,
        watchdog: Arc<dyn Watchdog>,
        settings: RunnerSettings,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(settings.command_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let (shutdown_tx, _) = watch::channel(false);
        let device_id = protocol.layout().device_id().to_string();

        let core = RunnerCore {
            protocol,
            commands: command_rx,
            status: status_tx,
            stage: Stage::Transport,
            next_attempt: None,
            launches: 0,
        };

        Self {
            inner: Arc::new(Shared {
                device_id,
                core: Arc::new(Mutex::new(core)),
                commands: command_tx,
                status: status_rx,
                shutdown: shutdown_tx,
                task: StdMutex::new(None),
                ctx: RunnerContext {
                    settings,
                    alive: Arc::new(AliveStamp::new()),
                    watchdog,
                },
            }),
        }
    }

    /// Assemble the stack described by `config` over the given transports
    pub fn from_config(
        config: &DeviceConfig,
        links: Vec<Link>,
        connector: Arc<dyn BrokerConnector>,
        certificates: Arc<dyn CertificateStore>,
        indicator: Arc<dyn Indicator>,
        watchdog: Arc<dyn Watchdog>,
    ) -> LinkResult<Self> {
        let (fallthrough, switch) = config.transport_pauses();
        let manager =
            TransportManager::new(config.transports.preference, links).with_pauses(fallthrough, switch);
        let processor = SessionProcessor::new(
            manager,
            connector,
            CertificateCache::new(certificates, config.certificates.names.clone()),
            config.topic_registry(),
            indicator,
            config.broker_settings()?,
            config.session_settings()?,
        );
        let protocol = RegistrationProtocol::new(
            processor,
            config.topic_layout(),
            config.registration_settings(),
        );
        Ok(Self::new(protocol, watchdog, config.runner_settings()))
    }

    /// Install logging at a numeric level (0 silent to 6 verbose) and start the runner
    pub fn setup(&self, log_level: u8) -> bool {
        if !init_device_logging(log_level) {
            debug!("Logging already initialized");
        }
        self.start()
    }

    /// Launch the runner task; false if it is already running
    pub fn start(&self) -> bool {
        let mut task = lock(&self.inner.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        self.spawn_runner(&mut task);
        true
    }

    fn spawn_runner(&self, slot: &mut Option<JoinHandle<()>>) {
        self.inner.shutdown.send_replace(false);
        self.inner.ctx.alive.touch();
        let span = crate::link_span!(device = %self.inner.device_id);
        *slot = Some(tokio::spawn(
            run(
                self.inner.core.clone(),
                self.inner.ctx.clone(),
                self.inner.shutdown.subscribe(),
            )
            .instrument(span),
        ));
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Supervise the runner: interrogate the watchdog and relaunch a runner
    /// that died or stopped making progress. Returns whether it was healthy.
    pub fn tick(&self) -> bool {
        self.inner.ctx.watchdog.interrogate();

        let mut task = lock(&self.inner.task);
        let Some(handle) = task.as_ref() else {
            return false;
        };
        let dead = handle.is_finished();
        let stuck = self.inner.ctx.alive.since() > self.inner.ctx.settings.stuck_threshold;
        if !dead && !stuck {
            return true;
        }

        error!(dead, stuck, "Runner unresponsive, relaunching");
        if let Some(handle) = task.take() {
            handle.abort();
        }
        self.spawn_runner(&mut task);
        false
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> LinkResult<T> {
        let (tx, rx) = oneshot::channel();
        let command = build(tx);

        match self.inner.core.try_lock() {
            Ok(mut core) => {
                core.handle(command).await;
                core.publish_status();
            }
            Err(_) => {
                let wait = self.inner.ctx.settings.command_timeout;
                match timeout(wait, self.inner.commands.send(command)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(LinkError::RunnerStopped),
                    Err(_) => return Err(LinkError::RunnerBusy(wait)),
                }
            }
        }

        let wait = self.inner.ctx.settings.command_timeout;
        match timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::RunnerStopped),
            Err(_) => Err(LinkError::RunnerBusy(wait)),
        }
    }

    /// Route messages matching `topic` to `callback`
    pub async fn subscribe(
        &self,
        topic: &str,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> bool {
        let topic = topic.to_string();
        let callback: TopicCallback = Arc::new(callback);
        let result = self
            .request(|reply| Command::Subscribe {
                topic,
                callback,
                reply,
            })
            .await;
        report("subscribe", result)
    }

    pub async fn unsubscribe(&self, topic: &str) -> bool {
        let topic = topic.to_string();
        let result = self
            .request(|reply| Command::Unsubscribe { topic, reply })
            .await;
        report("unsubscribe", result)
    }

    /// Publish text; fails immediately while the session is down
    pub async fn publish_topic(&self, topic: &str, payload: &str) -> bool {
        self.publish_bytes(topic, payload.as_bytes()).await
    }

    pub async fn publish_bytes(&self, topic: &str, payload: &[u8]) -> bool {
        if !self.is_connected() {
            warn!(topic, "Publish dropped, session is down");
            return false;
        }
        let topic = topic.to_string();
        let payload = payload.to_vec();
        let result = self
            .request(|reply| Command::Publish {
                topic,
                payload,
                reply,
            })
            .await;
        report("publish", result)
    }

    /// Expose a callable function to the cloud
    pub async fn function(
        &self,
        name: &str,
        callback: impl Fn(&str) -> i32 + Send + Sync + 'static,
    ) -> bool {
        let name = name.to_string();
        let callback: FunctionCallback = Arc::new(callback);
        let result = self
            .request(|reply| Command::Function {
                name,
                callback,
                reply,
            })
            .await;
        report("function", result)
    }

    /// Expose a readable variable to the cloud
    pub async fn variable(&self, name: &str, variable: &impl IntoBinding) -> bool {
        let name = name.to_string();
        let binding = variable.binding();
        let result = self
            .request(|reply| Command::Variable {
                name,
                binding,
                reply,
            })
            .await;
        report("variable", result)
    }

    /// Remember a Wi-Fi network on the Wi-Fi transport
    pub async fn add_network(&self, ssid: &str, password: &str) -> bool {
        let ssid = ssid.to_string();
        let password = password.to_string();
        let result = self
            .request(|reply| Command::AddNetwork {
                ssid,
                password,
                reply,
            })
            .await;
        report("add_network", result)
    }

    /// Change the cellular APN; the modem is reloaded
    pub async fn set_apn(&self, apn: &str) -> bool {
        let apn = apn.to_string();
        let result = self.request(|reply| Command::SetApn { apn, reply }).await;
        report("set_apn", result)
    }

    /// Change or clear the SIM PIN; the modem is reloaded
    pub async fn set_sim_pin(&self, pin: Option<&str>) -> bool {
        let pin = pin.map(str::to_string);
        let result = self.request(|reply| Command::SetSimPin { pin, reply }).await;
        report("set_sim_pin", result)
    }

    pub async fn power_save(&self, enabled: bool) -> bool {
        let result = self
            .request(|reply| Command::PowerSave { enabled, reply })
            .await;
        report("power_save", result)
    }

    pub async fn network_time(&self) -> Option<NetworkTime> {
        match self.request(|reply| Command::NetworkTime { reply }).await {
            Ok(time) => time,
            Err(e) => {
                warn!(error = %e, "Network time unavailable");
                None
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().connected
    }

    /// Connected and registered with the cloud
    pub fn ready(&self) -> bool {
        self.inner.status.borrow().ready
    }

    pub fn status(&self) -> LinkStatus {
        *self.inner.status.borrow()
    }

    /// Watch every status change
    pub fn status_updates(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status.clone()
    }

    /// Stop the runner and release the session and every transport
    pub async fn disconnect(&self) -> bool {
        let handle = lock(&self.inner.task).take();
        match handle {
            Some(handle) => {
                self.inner.shutdown.send_replace(true);
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!(error = %e, "Runner task failed");
                        return false;
                    }
                }
            }
            None => {
                let mut core = self.inner.core.lock().await;
                core.teardown().await;
                core.publish_status();
            }
        }
        info!("Device link disconnected");
        true
    }
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("device_id", &self.inner.device_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_alive_stamp_tracks_progress() {
        let stamp = AliveStamp::new();
        stamp.touch();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(stamp.since() >= Duration::from_secs(3));

        stamp.touch();
        assert!(stamp.since() < Duration::from_secs(1));
    }

    #[test]
    fn test_default_status_is_disconnected() {
        let status = LinkStatus::default();
        assert!(!status.connected);
        assert!(!status.ready);
        assert_eq!(status.transport, TransportClass::None);
        assert_eq!(status.phase, SessionPhase::Uninitialized);
    }

    #[test]
    fn test_default_settings() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.tick, Duration::from_millis(50));
        assert_eq!(settings.init_retry, Duration::from_millis(500));
        assert_eq!(settings.stuck_threshold, Duration::from_secs(600));
        assert_eq!(settings.command_timeout, Duration::from_secs(5));
    }
}
