//! GPK companion daemon entry point
//!
//! ```text
//! gpk-companion             Connect all visible devices and run
//! gpk-companion list        Print visible raw-HID devices and exit
//! gpk-companion -c <path>   Load a custom config TOML
//! ```
//!
//! The daemon keeps sessions alive, logs device events, and pushes the
//! standby clock to OLED-enabled devices once a minute.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gpk_companion::core::events;
use gpk_companion::hid::identity;
use gpk_companion::{
    DeviceEvent, EventReceiver, GpkConfig, GpkService, MemorySettings, SettingsStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gpk-companion", about = "Companion daemon for GPK keyboards and macropads")]
struct Cli {
    /// Path to a configuration TOML file (defaults to the per-user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the raw-HID devices currently visible and exit
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GpkConfig::load_from(path).context("failed to load configuration")?,
        None => GpkConfig::load().context("failed to load configuration")?,
    };

    let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettings::default());
    let (events_tx, events_rx) = events::channel();
    let service = Arc::new(
        GpkService::with_hidapi(&config, settings, events_tx)
            .context("failed to initialize hid backend")?,
    );

    match cli.command {
        Some(Command::List) => list_devices(&service),
        None => run(service, events_rx).await,
    }
}

fn list_devices(service: &GpkService) -> Result<()> {
    let devices = service.list_devices().context("device enumeration failed")?;
    if devices.is_empty() {
        println!("no raw-hid devices found");
        return Ok(());
    }
    for device in devices {
        println!(
            "{:04x}:{:04x}  {}  {}",
            device.vendor_id, device.product_id, device.manufacturer, device.product
        );
    }
    Ok(())
}

async fn run(service: Arc<GpkService>, mut events: EventReceiver) -> Result<()> {
    info!("starting gpk companion");
    let connected = service.connect_all().await;
    info!("{} device(s) connected", connected);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    // Pick up devices plugged in after startup. Already-live sessions make
    // this a cheap no-op per device.
    let discovery = service.clone();
    tokio::spawn(async move {
        let mut scan = tokio::time::interval(Duration::from_secs(5));
        scan.tick().await;
        loop {
            scan.tick().await;
            discovery.connect_all().await;
        }
    });

    // Once-a-second clock tick; the OLED dedup cache reduces it to one HID
    // write per device per minute.
    let clock = service.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            for id in clock.connected_ids() {
                let Some(descriptor) = identity::parse(id.as_str()) else {
                    continue;
                };
                if let Err(err) = clock.write_oled_clock(&descriptor).await {
                    debug!(device = %id, error = %err, "clock push failed");
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    info!("shutting down");
    service.stop_all().await;
    Ok(())
}

fn log_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Connected { device } => info!(%device, "device connected"),
        DeviceEvent::Ready {
            device,
            device_type,
            firmware_version,
        } => info!(%device, ?device_type, firmware_version, "device ready"),
        DeviceEvent::Disconnected { device } => info!(%device, "device disconnected"),
        DeviceEvent::ConfigUpdated { device, kind } => debug!(%device, ?kind, "config updated"),
        DeviceEvent::PomodoroPhase { device, status } => debug!(
            %device,
            phase = ?status.phase,
            minutes = status.minutes,
            seconds = status.seconds,
            "pomodoro status"
        ),
        DeviceEvent::SaveComplete { device } => debug!(%device, "save confirmed"),
    }
}
