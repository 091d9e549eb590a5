/*!
Observer location.
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::shutdown::ShutdownSignal;

/// Geolocation failures
#[derive(Error, Debug)]
pub enum LocateError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geolocation service returned status {0}")]
    Status(u16),
}

/// Where the station is. Latitude positive north, longitude positive east,
/// altitude in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

#[derive(Debug, Deserialize)]
struct GeoFix {
    latitude: f64,
    longitude: f64,
}

/// Ask an IP geolocation service where we are
pub async fn locate(client: &reqwest::Client, url: &str) -> Result<(f64, f64), LocateError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(LocateError::Status(response.status().as_u16()));
    }

    let fix: GeoFix = response.json().await?;
    Ok((fix.latitude, fix.longitude))
}

impl Observer {
    /// Use the configured coordinates when both are present, otherwise fall
    /// back to geolocation. Returns `None` if geolocation gave up.
    pub async fn resolve(
        latitude: Option<f64>,
        longitude: Option<f64>,
        altitude: f64,
        geolocation_url: &str,
        timeout: Duration,
        policy: RetryPolicy,
        shutdown: &ShutdownSignal,
    ) -> Option<Self> {
        if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
            return Some(Self { latitude, longitude, altitude });
        }

        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Failed to build HTTP client: {}", e);
                return None;
            }
        };

        let (latitude, longitude) =
            retry_with_backoff("station location", policy, shutdown, || locate(&client, geolocation_url)).await?;

        info!("📍 Estimated station location: {:.4}, {:.4}", latitude, longitude);
        Some(Self { latitude, longitude, altitude })
    }
}
