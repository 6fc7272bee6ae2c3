//! devicelink - run a device connection from a configuration file

use clap::{Parser, Subcommand};
use devicelink::config::DeviceConfig;
use devicelink::observability::{init_default_logging, init_device_logging};
use devicelink::peripherals::{LogIndicator, StallWatchdog};
use devicelink::session::MqttConnector;
use devicelink::transport::{HostTransport, KnownNetwork, Link};
use devicelink::DeviceLink;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{interval, Duration},
};
use tracing::{error, info, warn};

/// Cloud connectivity for devices
#[derive(Parser)]
#[command(name = "devicelink")]
#[command(about = "Keep a device connected to its cloud MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stay connected until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Manage the known Wi-Fi networks file
    Networks {
        #[command(subcommand)]
        action: NetworkAction,
    },
}

#[derive(Subcommand)]
enum NetworkAction {
    /// Remember a network
    Add { ssid: String, password: String },
    /// List remembered networks
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_default_logging();
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    init_device_logging(config.device.log_level);
    info!("Starting devicelink v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Networks { action } => handle_networks_command(&config, action),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    for path_str in ["device.toml", "config/device.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            return Ok(DeviceConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create device.toml".into())
}

/// Links that can be driven from this host; radio sections need board drivers
fn host_links(config: &DeviceConfig) -> Result<Vec<Link>, Box<dyn std::error::Error>> {
    let transports = &config.transports;
    if transports.wifi.is_some() {
        warn!("Wi-Fi section ignored: no Wi-Fi radio driver on this host");
    }
    if transports.cellular.is_some() {
        warn!("Cellular section ignored: no modem driver on this host");
    }
    if transports.bluetooth.is_some() {
        warn!("Bluetooth section ignored: no Bluetooth serial driver on this host");
    }

    match config.host_settings()? {
        Some(settings) => Ok(vec![Link::Host(HostTransport::new(settings))]),
        None => Err("No [transports.host] section; nothing to connect over".into()),
    }
}

async fn run_device(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(device = %config.device.id, broker = %config.broker.url, "Device starting");

    let runner = config.runner_settings();
    let watchdog = Arc::new(StallWatchdog::exiting(runner.stuck_threshold));
    let link = DeviceLink::from_config(
        &config,
        host_links(&config)?,
        Arc::new(MqttConnector),
        Arc::new(config.certificate_store()),
        Arc::new(LogIndicator::default()),
        watchdog,
    )?;

    if !link.start() {
        return Err("Runner already started".into());
    }

    let mut supervise = interval(Duration::from_secs(1));
    let mut status = link.status_updates();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received interrupt, shutting down gracefully...");
                break;
            }
            _ = supervise.tick() => {
                link.tick();
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(
                    connected = current.connected,
                    ready = current.ready,
                    transport = %current.transport,
                    phase = %current.phase,
                    "Link status changed"
                );
            }
        }
    }

    if !link.disconnect().await {
        return Err("Disconnect failed".into());
    }
    info!("Device shutdown complete");
    Ok(())
}

fn handle_config_command(
    config: &DeviceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    info!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

fn handle_networks_command(
    config: &DeviceConfig,
    action: NetworkAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = config.network_store();
    if store.path().is_none() {
        return Err("No [transports.wifi] networks_file configured".into());
    }
    store.load()?;

    match action {
        NetworkAction::Add { ssid, password } => {
            store.add(KnownNetwork::new(ssid.as_str(), password))?;
            store.save()?;
            info!(%ssid, "Network saved");
        }
        NetworkAction::List => {
            for network in store.networks() {
                println!("{}", network.ssid);
            }
        }
    }
    Ok(())
}
