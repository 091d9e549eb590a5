/*!
Configuration management for the ground station.
*/

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::MountCalibration;

use crate::link::LinkSettings;
use crate::predict::LookAngle;
use crate::retry::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub mount: MountCalibration,
    pub station: StationConfig,
    pub catalog: CatalogConfig,
    pub control: ControlConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

/// Serial link to the mount controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path
    pub port: String,

    /// Line rate
    pub baud_rate: u32,

    /// Per-read timeout
    pub read_timeout_ms: u64,

    /// Pause between reconnect attempts
    pub reconnect_interval_secs: u64,

    /// Wait after opening for the controller to come out of reset
    pub settle_secs: u64,
}

impl DeviceConfig {
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
            settle_time: Duration::from_secs(self.settle_secs),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: shared::protocol::BAUD_RATE,
            read_timeout_ms: shared::protocol::READ_TIMEOUT_MS,
            reconnect_interval_secs: 5,
            settle_secs: 2,
        }
    }
}

/// Observer location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Degrees north; geolocated when unset
    pub latitude: Option<f64>,

    /// Degrees east; geolocated when unset
    pub longitude: Option<f64>,

    /// Metres above sea level
    pub altitude: f64,

    /// IP geolocation endpoint returning JSON `latitude`/`longitude`
    pub geolocation_url: String,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            altitude: 0.0,
            geolocation_url: "https://freeipapi.com/api/json".to_string(),
        }
    }
}

/// Target catalog and predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Whitespace-separated list of target identifiers
    pub url: String,

    /// How often to refresh the list; also the back-off ceiling
    pub refresh_interval_secs: u64,

    /// First back-off interval after a failed fetch
    pub initial_retry_secs: u64,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    /// Precomputed passes (JSON)
    pub ephemeris_path: String,
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.initial_retry_secs), self.refresh_interval())
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "https://s3-us-west-2.amazonaws.com/ardustation/satellites".to_string(),
            refresh_interval_secs: 6 * 60 * 60,
            initial_retry_secs: 10,
            request_timeout_secs: 30,
            ephemeris_path: "passes.json".to_string(),
        }
    }
}

/// Control loop pacing and compass mode target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Tracking mode tick
    pub tick_interval_ms: u64,

    /// Compass mode tick
    pub compass_tick_interval_ms: u64,

    /// Pause before looking for passes again after finding none
    pub idle_interval_secs: u64,

    /// Heading filter coefficient, in (0, 1]
    pub heading_alpha: f64,

    /// Fixed direction held in compass mode
    pub compass_target: LookAngle,

    /// Name shown on the display in compass mode
    pub compass_name: String,
}

impl ControlConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn compass_tick_interval(&self) -> Duration {
        Duration::from_millis(self.compass_tick_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            compass_tick_interval_ms: 100,
            idle_interval_secs: 60,
            heading_alpha: 0.5,
            compass_target: LookAngle {
                azimuth: 1.0,
                elevation: 45.0,
            },
            compass_name: "OSCAR 7".to_string(),
        }
    }
}
