/*!
Control loops.

Two mutually exclusive modes, picked at startup:

- [`CompassLoop`] holds a fixed direction relative to the magnetometer
  heading, so the mount keeps pointing the same way while it is turned.
- [`TrackingLoop`] waits for the next pass across the catalog, counts down
  on the display, then follows the target until the pass ends.

Both pace themselves with fixed sleeps and stop only on shutdown.
*/

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use shared::{DevicePosition, HeadingFilter, MountCalibration, TrackingMode};

use crate::catalog::{CatalogRefresher, CatalogSource};
use crate::device::{Actuator, DeviceError, HeadingSensor, StatusDisplay};
use crate::predict::{next_transit, LookAngle, Predictor, Target, Transit};
use crate::shutdown::ShutdownSignal;
use crate::station::Observer;

/// Display text when nothing is coming up
pub const NO_PASS_NAME: &str = "Launch more sats";
pub const NO_PASS_STATUS: &str = "No upcoming passes";

/// Countdown text for the status line, e.g. `In 1:02:05`
pub fn format_countdown(remaining: TimeDelta) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;
    format!("In {}:{:02}:{:02}", hours, minutes, seconds)
}

/// Compass mode: point at a fixed bearing relative to the sensed heading
pub struct CompassLoop<D> {
    device: D,
    filter: HeadingFilter,
    calibration: MountCalibration,
    target: LookAngle,
    name: String,
    tick_interval: Duration,
    shutdown: ShutdownSignal,
}

impl<D: HeadingSensor + Actuator + StatusDisplay> CompassLoop<D> {
    pub fn new(
        device: D,
        filter: HeadingFilter,
        calibration: MountCalibration,
        target: LookAngle,
        name: impl Into<String>,
        tick_interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            device,
            filter,
            calibration,
            target,
            name: name.into(),
            tick_interval,
            shutdown,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn heading(&self) -> f64 {
        self.filter.heading()
    }

    /// One update. A failed heading read aborts the tick before anything is
    /// sent to the servos.
    pub fn tick(&mut self) -> Result<DevicePosition, DeviceError> {
        self.device.show_name(&self.name);

        let observed = self.device.current_heading()?;
        let heading = self.filter.update(observed);

        let position = self.calibration.transform(
            self.target.azimuth - heading,
            self.target.elevation,
            TrackingMode::Compass,
        );
        debug!(
            "Heading {:.1} (raw {:.1}) -> az {:.1} el {:.1}",
            heading, observed, position.azimuth, position.elevation
        );

        self.device.set_position(position.azimuth, position.elevation);
        Ok(position)
    }

    pub fn run(&mut self) {
        info!("🧭 Compass mode: holding az {:.1} el {:.1}", self.target.azimuth, self.target.elevation);

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.tick() {
                error!("Heading unavailable, skipping update: {}", e);
            }

            if self.shutdown.wait(self.tick_interval) {
                break;
            }
        }
    }
}

/// Where the tracking loop is in the pass cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// Looking for the next pass
    Searching,
    /// Pass found, counting down to its start
    Waiting { target: Target, transit: Transit },
    /// Following the target
    Passing { target: Target, transit: Transit },
    /// Nothing upcoming; look again at `until`
    Idle { until: DateTime<Utc> },
}

/// Tracking mode: follow predicted passes
pub struct TrackingLoop<D, P, S: CatalogSource> {
    device: D,
    predictor: P,
    refresher: CatalogRefresher<S>,
    observer: Observer,
    calibration: MountCalibration,
    tick_interval: Duration,
    idle_interval: Duration,
    shutdown: ShutdownSignal,
    phase: Phase,
}

impl<D, P, S> TrackingLoop<D, P, S>
where
    D: Actuator + StatusDisplay,
    P: Predictor,
    S: CatalogSource,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: D,
        predictor: P,
        refresher: CatalogRefresher<S>,
        observer: Observer,
        calibration: MountCalibration,
        tick_interval: Duration,
        idle_interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            device,
            predictor,
            refresher,
            observer,
            calibration,
            tick_interval,
            idle_interval,
            shutdown,
            phase: Phase::Searching,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Advance the state machine by one tick at time `now`
    pub fn step(&mut self, now: DateTime<Utc>) {
        let phase = std::mem::replace(&mut self.phase, Phase::Searching);

        self.phase = match phase {
            Phase::Searching => self.search(now),
            Phase::Idle { until } if now < until => Phase::Idle { until },
            Phase::Idle { .. } => self.search(now),
            Phase::Waiting { target, transit } if now < transit.start => {
                self.countdown(&target, transit.start - now);
                Phase::Waiting { target, transit }
            }
            Phase::Waiting { target, transit } | Phase::Passing { target, transit } => {
                self.track(target, transit, now)
            }
        };
    }

    pub fn run(&mut self) {
        info!("🛰️ Tracking mode from {:.4}, {:.4}", self.observer.latitude, self.observer.longitude);

        while !self.shutdown.is_triggered() {
            self.step(Utc::now());

            if self.shutdown.wait(self.tick_interval) {
                break;
            }
        }
    }

    fn search(&mut self, now: DateTime<Utc>) -> Phase {
        self.refresher.refresh_if_due();
        let catalog = self.refresher.catalog().snapshot();

        match next_transit(&self.predictor, &catalog.ids, &self.observer, now) {
            Some((target, transit)) => {
                info!("Next pass: {} from {} to {}", target.name, transit.start, transit.end);

                self.device.disable();
                self.device.show_name(&target.name);

                if now < transit.start {
                    self.countdown(&target, transit.start - now);
                    Phase::Waiting { target, transit }
                } else {
                    self.track(target, transit, now)
                }
            }
            None => {
                warn!("No upcoming passes among {} targets", catalog.ids.len());

                self.device.show_name(NO_PASS_NAME);
                self.device.show_status(NO_PASS_STATUS);

                let idle = TimeDelta::from_std(self.idle_interval).unwrap_or(TimeDelta::minutes(1));
                Phase::Idle { until: now + idle }
            }
        }
    }

    fn countdown(&mut self, target: &Target, remaining: TimeDelta) {
        self.device.show_name(&target.name);
        self.device.show_status(&format_countdown(remaining));
    }

    fn track(&mut self, target: Target, transit: Transit, now: DateTime<Utc>) -> Phase {
        if now >= transit.end {
            info!("Pass of {} complete", target.name);
            return Phase::Searching;
        }

        match self.predictor.observe(&target, &self.observer, now) {
            Ok(look) => {
                let position = self.calibration.transform(look.azimuth, look.elevation, TrackingMode::Target);
                debug!(
                    "{}: az {:.1} el {:.1} -> servo az {:.1} el {:.1}",
                    target.name, look.azimuth, look.elevation, position.azimuth, position.elevation
                );
                self.device.set_position(position.azimuth, position.elevation);
            }
            Err(e) => warn!("No look angle for {}: {}", target.name, e),
        }

        self.device.show_name(&target.name);
        self.device.show_status("");

        Phase::Passing { target, transit }
    }
}
