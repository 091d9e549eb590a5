/*!
# Ground Station

Drives a two-axis antenna mount over a serial link.

## Modes

- **track**: follow predicted satellite passes, with a countdown on the
  mount's display between passes
- **compass**: hold a fixed direction while the mount is turned, using the
  on-board magnetometer

## Usage

```bash
groundstation track --port /dev/ttyACM0
groundstation compass
groundstation config --output groundstation.toml
```
*/

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

mod catalog;
mod config;
mod control;
mod device;
mod link;
mod predict;
mod retry;
mod shutdown;
mod station;

#[cfg(test)]
mod testing;

use catalog::{CatalogRefresher, HttpCatalog, SharedCatalog};
use config::AppConfig;
use control::{CompassLoop, TrackingLoop};
use device::DeviceClient;
use link::{FramedLink, LinkError, SerialOpener};
use predict::EphemerisTable;
use shared::HeadingFilter;
use shutdown::ShutdownSignal;
use station::Observer;

#[derive(Parser)]
#[command(name = "groundstation")]
#[command(about = "Antenna mount control: satellite pass tracking and compass pointing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "groundstation.toml")]
    config: PathBuf,

    /// Log every frame on the wire
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow satellite passes
    Track {
        /// Serial port, overrides the config file
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Hold a fixed direction relative to the magnetometer
    Compass {
        /// Serial port, overrides the config file
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "groundstation.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout stays free for the user; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match cli.command {
        Commands::Track { port } => {
            let config = load_config(&cli.config, port)?;
            run_tracking(config)
        }
        Commands::Compass { port } => {
            let config = load_config(&cli.config, port)?;
            run_compass(config)
        }
        Commands::Config { output } => generate_config_file(output),
    }
}

/// Config file if present, defaults otherwise
fn load_config(path: &Path, port: Option<String>) -> Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load_from_file(path)?
    } else {
        warn!("⚠️ No config at {}, using defaults", path.display());
        AppConfig::new()
    };

    if let Some(port) = port {
        config.device.port = port;
    }

    Ok(config)
}

/// Ctrl+C flips the shutdown signal; every wait in the program watches it
fn install_shutdown_handler() -> Result<ShutdownSignal> {
    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();

    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down gracefully...");
        handler_signal.trigger();
    })
    .context("Failed to install Ctrl+C handler")?;

    Ok(shutdown)
}

/// Open the serial link, retrying until the controller shows up
fn connect_device(config: &AppConfig, shutdown: &ShutdownSignal) -> Result<Option<DeviceClient>> {
    let settings = config.device.link_settings();
    info!("🔌 Connecting to mount controller on {} at {} baud", settings.port, settings.baud_rate);

    let mut link = FramedLink::new(Box::new(SerialOpener), settings, shutdown.clone());

    match link.connect() {
        Ok(()) => Ok(Some(DeviceClient::new(link))),
        Err(LinkError::Cancelled) => Ok(None),
        Err(e) => Err(e).context("Failed to connect to mount controller"),
    }
}

fn run_tracking(config: AppConfig) -> Result<()> {
    let shutdown = install_shutdown_handler()?;

    let ephemeris = EphemerisTable::load_from_file(&config.catalog.ephemeris_path)
        .with_context(|| format!("Failed to load ephemeris from {}", config.catalog.ephemeris_path))?;
    info!("📖 Loaded ephemeris for {} targets", ephemeris.len());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let observer = runtime.block_on(Observer::resolve(
        config.station.latitude,
        config.station.longitude,
        config.station.altitude,
        &config.station.geolocation_url,
        config.catalog.request_timeout(),
        config.catalog.retry_policy(),
        &shutdown,
    ));
    let Some(observer) = observer else {
        if shutdown.is_triggered() {
            return Ok(());
        }
        bail!("Could not determine station location");
    };

    ephemeris
        .check_site(&observer)
        .context("Ephemeris was computed for a different station")?;

    let source = HttpCatalog::new(config.catalog.url.clone(), config.catalog.request_timeout())?;
    let mut refresher = CatalogRefresher::new(
        source,
        SharedCatalog::new(),
        config.catalog.retry_policy(),
        config.catalog.refresh_interval(),
        shutdown.clone(),
    );
    refresher.refresh(true);

    let Some(device) = connect_device(&config, &shutdown)? else {
        return Ok(());
    };

    let mut control = TrackingLoop::new(
        device,
        ephemeris,
        refresher,
        observer,
        config.mount,
        config.control.tick_interval(),
        config.control.idle_interval(),
        shutdown,
    );
    control.run();

    info!("✅ Tracking stopped");
    Ok(())
}

fn run_compass(config: AppConfig) -> Result<()> {
    let shutdown = install_shutdown_handler()?;
    let filter = HeadingFilter::new(config.control.heading_alpha).context("Invalid heading_alpha")?;

    let Some(device) = connect_device(&config, &shutdown)? else {
        return Ok(());
    };

    let mut control = CompassLoop::new(
        device,
        filter,
        config.mount,
        config.control.compass_target,
        config.control.compass_name.clone(),
        config.control.compass_tick_interval(),
        shutdown,
    );
    control.run();

    info!("✅ Compass mode stopped");
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   groundstation --config {} track", output_path.display());

    Ok(())
}
