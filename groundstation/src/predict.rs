/*!
Pass prediction.

Orbital propagation happens elsewhere. The station only needs upcoming
visibility windows for each target and the look angle during a pass, behind
the [`Predictor`] trait. [`EphemerisTable`] serves both from a JSON file of
passes precomputed for one site.
*/

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::station::Observer;

/// Largest site difference (degrees) an ephemeris table tolerates
const SITE_TOLERANCE_DEG: f64 = 0.5;

/// Prediction failures
#[derive(Error, Debug)]
pub enum PredictError {
    /// The target never rises, or the time is outside every known pass
    #[error("No solution for {0}")]
    NoSolution(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Predictions were made for {expected:?}, not {requested:?}")]
    SiteMismatch { expected: Observer, requested: Observer },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ephemeris: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A trackable object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub name: String,
}

/// A visibility window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transit {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Pointing direction seen from the observer, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAngle {
    pub azimuth: f64,
    pub elevation: f64,
}

/// Lazy sequence of upcoming transits. Calling `transits` again restarts it.
pub type Transits<'a> = Box<dyn Iterator<Item = Transit> + 'a>;

/// Prediction collaborator
pub trait Predictor {
    /// Resolve an identifier from the catalog
    fn target(&self, id: &str) -> Result<Target, PredictError>;

    /// Transits that have not ended by `after`, in start order
    fn transits<'a>(
        &'a self,
        target: &Target,
        observer: &Observer,
        after: DateTime<Utc>,
    ) -> Result<Transits<'a>, PredictError>;

    /// Look angle at `at`
    fn observe(&self, target: &Target, observer: &Observer, at: DateTime<Utc>) -> Result<LookAngle, PredictError>;
}

/// Earliest upcoming transit across `ids`. Targets that cannot be resolved
/// or have no solution are skipped.
pub fn next_transit<P: Predictor + ?Sized>(
    predictor: &P,
    ids: &[String],
    observer: &Observer,
    now: DateTime<Utc>,
) -> Option<(Target, Transit)> {
    let mut best: Option<(Target, Transit)> = None;

    for id in ids {
        let target = match predictor.target(id) {
            Ok(target) => target,
            Err(e) => {
                debug!("Skipping {}: {}", id, e);
                continue;
            }
        };

        let transit = match predictor.transits(&target, observer, now) {
            Ok(mut transits) => transits.next(),
            Err(e) => {
                debug!("Skipping {}: {}", id, e);
                continue;
            }
        };

        let Some(transit) = transit else {
            continue;
        };

        if best.as_ref().map_or(true, |(_, current)| transit.start < current.start) {
            best = Some((target, transit));
        }
    }

    best
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackPoint {
    time: DateTime<Utc>,
    azimuth: f64,
    elevation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PassRecord {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    track: Vec<TrackPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TargetRecord {
    id: String,
    name: String,
    #[serde(default)]
    passes: Vec<PassRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EphemerisFile {
    site: Observer,
    targets: Vec<TargetRecord>,
}

/// Precomputed passes for a single site
#[derive(Debug, Clone)]
pub struct EphemerisTable {
    site: Observer,
    targets: Vec<TargetRecord>,
}

impl EphemerisTable {
    /// Load a table from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PredictError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, PredictError> {
        let file: EphemerisFile = serde_json::from_str(content)?;
        let mut targets = file.targets;

        for target in &mut targets {
            target.passes.sort_by_key(|pass| pass.start);
            for pass in &mut target.passes {
                pass.track.sort_by_key(|point| point.time);
            }
        }

        Ok(Self { site: file.site, targets })
    }

    pub fn site(&self) -> &Observer {
        &self.site
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn record(&self, id: &str) -> Result<&TargetRecord, PredictError> {
        self.targets
            .iter()
            .find(|record| record.id == id)
            .ok_or_else(|| PredictError::UnknownTarget(id.to_string()))
    }

    /// Whether predictions in this table hold for `observer`
    pub fn check_site(&self, observer: &Observer) -> Result<(), PredictError> {
        // longitudes either side of the antimeridian are neighbours
        let longitude_gap = ((self.site.longitude - observer.longitude + 540.0).rem_euclid(360.0) - 180.0).abs();
        let close = (self.site.latitude - observer.latitude).abs() <= SITE_TOLERANCE_DEG
            && longitude_gap <= SITE_TOLERANCE_DEG;

        if close {
            Ok(())
        } else {
            Err(PredictError::SiteMismatch {
                expected: self.site,
                requested: *observer,
            })
        }
    }
}

impl Predictor for EphemerisTable {
    fn target(&self, id: &str) -> Result<Target, PredictError> {
        let record = self.record(id)?;
        Ok(Target {
            id: record.id.clone(),
            name: record.name.clone(),
        })
    }

    fn transits<'a>(
        &'a self,
        target: &Target,
        observer: &Observer,
        after: DateTime<Utc>,
    ) -> Result<Transits<'a>, PredictError> {
        self.check_site(observer)?;
        let record = self.record(&target.id)?;

        if record.passes.is_empty() {
            return Err(PredictError::NoSolution(target.name.clone()));
        }

        Ok(Box::new(
            record
                .passes
                .iter()
                .filter(move |pass| pass.end > after)
                .map(|pass| Transit {
                    start: pass.start,
                    end: pass.end,
                }),
        ))
    }

    fn observe(&self, target: &Target, observer: &Observer, at: DateTime<Utc>) -> Result<LookAngle, PredictError> {
        self.check_site(observer)?;
        let record = self.record(&target.id)?;

        let pass = record
            .passes
            .iter()
            .find(|pass| pass.start <= at && at <= pass.end && !pass.track.is_empty())
            .ok_or_else(|| PredictError::NoSolution(target.name.clone()))?;

        Ok(interpolate(&pass.track, at))
    }
}

/// Linear interpolation along a time-sorted, non-empty track. Azimuth takes
/// the short way round; times outside the track hold the nearest point.
fn interpolate(track: &[TrackPoint], at: DateTime<Utc>) -> LookAngle {
    let after = track.partition_point(|point| point.time <= at);

    if after == 0 || after == track.len() {
        let point = &track[after.saturating_sub(1)];
        return LookAngle {
            azimuth: point.azimuth,
            elevation: point.elevation,
        };
    }

    let a = &track[after - 1];
    let b = &track[after];
    let span = (b.time - a.time).num_milliseconds() as f64;
    let fraction = if span > 0.0 {
        (at - a.time).num_milliseconds() as f64 / span
    } else {
        0.0
    };

    let delta = (b.azimuth - a.azimuth + 540.0).rem_euclid(360.0) - 180.0;

    LookAngle {
        azimuth: (a.azimuth + delta * fraction).rem_euclid(360.0),
        elevation: a.elevation + (b.elevation - a.elevation) * fraction,
    }
}
