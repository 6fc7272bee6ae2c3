//! devicelink - connectivity core for cloud-connected devices
//!
//! Keeps a device attached to a cloud MQTT broker over whichever network link
//! is available, and exposes device functions and variables for remote calls.
//!
//! # Overview
//!
//! The stack is layered bottom-up:
//! - [`transport`]: Wi-Fi, cellular, Bluetooth and host links behind one
//!   trait, plus the [`TransportManager`] that fails over between them
//! - [`secure`] and [`certificates`]: TLS material loading and the secure client
//! - [`session`]: the MQTT session lifecycle with retry, restoration and
//!   keep-alive
//! - [`registry`]: wildcard topic patterns mapped to callbacks
//! - [`registration`]: the function/variable call protocol on top of the session
//! - [`runner`]: the task that drives everything, and the [`DeviceLink`] handle
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use devicelink::config::DeviceConfig;
//! use devicelink::peripherals::{LogIndicator, StallWatchdog};
//! use devicelink::session::MqttConnector;
//! use devicelink::transport::{HostTransport, Link};
//! use devicelink::{DeviceLink, Variable};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::load_from_file("device.toml".as_ref())?;
//! let links = match config.host_settings()? {
//!     Some(settings) => vec![Link::Host(HostTransport::new(settings))],
//!     None => Vec::new(),
//! };
//! let link = DeviceLink::from_config(
//!     &config,
//!     links,
//!     Arc::new(MqttConnector),
//!     Arc::new(config.certificate_store()),
//!     Arc::new(LogIndicator::default()),
//!     Arc::new(StallWatchdog::exiting(Duration::from_secs(600))),
//! )?;
//!
//! let temperature = Variable::new(21.5_f64);
//! link.variable("temperature", &temperature).await;
//! link.function("reset", |_args| 0).await;
//! link.subscribe("sensors/#", |topic, payload| println!("{topic}: {payload}")).await;
//!
//! link.setup(4);
//! # Ok(())
//! # }
//! ```

pub mod certificates;
pub mod config;
pub mod error;
pub mod observability;
pub mod peripherals;
pub mod registration;
pub mod registry;
pub mod runner;
pub mod secure;
pub mod session;
pub mod testing;
pub mod timers;
pub mod transport;

pub use config::{ConfigError, DeviceConfig};
pub use error::{LinkError, LinkResult};
pub use registration::{RegistrationProtocol, Variable};
pub use registry::TopicRegistry;
pub use runner::{DeviceLink, LinkStatus, RunnerSettings};
pub use session::{SessionPhase, SessionProcessor};
pub use transport::{Link, TransportClass, TransportManager};
