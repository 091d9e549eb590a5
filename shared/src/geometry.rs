/*!
Mount geometry: from a logical pointing direction to angles the two servos
can physically reach.

The azimuth servo only covers half a turn, so targets behind it are reached
by leaning the elevation axis back over the pole instead.
*/

use serde::{Deserialize, Serialize};

use crate::protocol::{MAX_DEVICE_ELEVATION, MIN_DEVICE_ELEVATION, PULSE_MAX_US, PULSE_MIN_US};

/// Angles in the servo frame, ready to be turned into pulse widths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePosition {
    pub azimuth: f64,
    pub elevation: f64,
}

impl DevicePosition {
    /// Pulse widths for (azimuth, elevation)
    pub fn pulses(&self) -> (u16, u16) {
        (pulse_width(self.azimuth), pulse_width(self.elevation))
    }
}

/// Where the pointing target comes from. Each source has its own zero
/// reference relative to the mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Azimuth from the pass predictor
    Target,
    /// Azimuth derived from the magnetometer heading
    Compass,
}

/// Calibration constants for one physical rig
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountCalibration {
    /// Added to elevation to compensate for the mount's zero point
    pub elevation_trim: f64,

    /// Added to predictor azimuth before folding
    pub target_azimuth_offset: f64,

    /// Added to compass-derived azimuth before folding
    pub compass_azimuth_offset: f64,
}

impl Default for MountCalibration {
    fn default() -> Self {
        Self {
            elevation_trim: 10.0,
            target_azimuth_offset: 110.0,
            compass_azimuth_offset: -110.0,
        }
    }
}

impl MountCalibration {
    /// Azimuth offset aligning the given source with the mount's physical zero
    pub fn azimuth_offset(&self, mode: TrackingMode) -> f64 {
        match mode {
            TrackingMode::Target => self.target_azimuth_offset,
            TrackingMode::Compass => self.compass_azimuth_offset,
        }
    }

    /// Apply the mode offset, then [`normalize`]
    pub fn transform(&self, azimuth: f64, elevation: f64, mode: TrackingMode) -> DevicePosition {
        normalize(azimuth + self.azimuth_offset(mode), elevation, self.elevation_trim)
    }
}

/// Map a logical (azimuth, elevation) to servo angles.
///
/// 1. fold azimuth into [0, 360)
/// 2. invert it, the servo turns the other way
/// 3. past 180, flip over the pole: azimuth - 180, elevation becomes 180 - elevation
/// 4. add the elevation trim
/// 5. saturate elevation to the servo's usable range
///
/// Azimuth is never clamped; non-finite input is the caller's problem.
pub fn normalize(azimuth: f64, elevation: f64, elevation_trim: f64) -> DevicePosition {
    let folded = azimuth.rem_euclid(360.0);
    let mut azimuth = 360.0 - folded;
    let mut elevation = elevation;

    if azimuth > 180.0 {
        azimuth -= 180.0;
        elevation = 180.0 - elevation;
    }

    elevation = (elevation + elevation_trim).clamp(MIN_DEVICE_ELEVATION, MAX_DEVICE_ELEVATION);

    DevicePosition { azimuth, elevation }
}

/// Servo pulse width in microseconds for an angle in [0, 180] degrees,
/// truncated toward zero
pub fn pulse_width(angle: f64) -> u16 {
    let span = (PULSE_MAX_US - PULSE_MIN_US) as f64;
    (angle / 180.0 * span + PULSE_MIN_US as f64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    #[test]
    fn test_pulse_width_endpoints() {
        assert_eq!(pulse_width(0.0), 544);
        assert_eq!(pulse_width(180.0), 2400);
        assert_eq!(pulse_width(90.0), 1472);
    }

    #[test]
    fn test_pulse_width_is_monotonic() {
        let mut previous = pulse_width(0.0);
        for tenth in 1..=1800 {
            let pulse = pulse_width(tenth as f64 / 10.0);
            assert!(pulse >= previous);
            previous = pulse;
        }
        // strictly increasing at whole-degree resolution
        for degree in 1..=180 {
            assert!(pulse_width(degree as f64) > pulse_width((degree - 1) as f64));
        }
    }

    #[test]
    fn test_normalize_without_flip() {
        let position = normalize(190.0, 45.0, 10.0);
        assert_close(position.azimuth, 170.0);
        assert_close(position.elevation, 55.0);
    }

    #[test]
    fn test_normalize_over_the_pole() {
        // 160 inverts to 200, which flips to 20 and leans back
        let position = normalize(160.0, 45.0, 10.0);
        assert_close(position.azimuth, 20.0);
        assert_close(position.elevation, 145.0);
    }

    #[test]
    fn test_normalize_folds_azimuth() {
        let wrapped = normalize(190.0 + 720.0, 45.0, 10.0);
        assert_close(wrapped.azimuth, 170.0);

        let negative = normalize(-170.0, 45.0, 10.0);
        assert_close(negative.azimuth, 170.0);
    }

    #[test]
    fn test_normalize_zero_azimuth_flips() {
        // 0 inverts to 360, the far end of the flip range
        let position = normalize(0.0, 30.0, 10.0);
        assert_close(position.azimuth, 180.0);
        assert_close(position.elevation, 160.0);
    }

    #[test]
    fn test_elevation_saturates() {
        assert_close(normalize(190.0, 0.0, 10.0).elevation, 20.0);
        assert_close(normalize(190.0, -40.0, 10.0).elevation, 20.0);
        assert_close(normalize(190.0, 175.0, 10.0).elevation, 180.0);
        // flipped low target: 180 - (-30) + 10 = 220
        assert_close(normalize(160.0, -30.0, 10.0).elevation, 180.0);
    }

    #[test]
    fn test_mode_offsets() {
        let calibration = MountCalibration::default();

        let target = calibration.transform(80.0, 45.0, TrackingMode::Target);
        assert_close(target.azimuth, 170.0);
        assert_close(target.elevation, 55.0);

        let compass = calibration.transform(300.0, 45.0, TrackingMode::Compass);
        assert_close(compass.azimuth, 170.0);
    }

    #[test]
    fn test_device_position_pulses() {
        let position = DevicePosition { azimuth: 0.0, elevation: 180.0 };
        assert_eq!(position.pulses(), (544, 2400));
    }
}
