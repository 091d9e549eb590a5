/*!
Exponential smoothing of magnetometer headings.
*/

use crate::error::{ProtocolError, Result};

/// Smoothed heading estimate.
///
/// `heading = alpha * observation + (1 - alpha) * heading`
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingFilter {
    alpha: f64,
    heading: f64,
}

impl HeadingFilter {
    /// Create a filter starting from a heading of zero. `alpha` must lie in (0, 1].
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ProtocolError::InvalidParameter(format!(
                "heading filter alpha {alpha} outside (0, 1]"
            )));
        }

        Ok(Self { alpha, heading: 0.0 })
    }

    /// Blend an observation into the estimate and return the new heading
    pub fn update(&mut self, observation: f64) -> f64 {
        self.heading = self.alpha * observation + (1.0 - self.alpha) * self.heading;
        self.heading
    }

    /// Current estimate in degrees
    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_toward_repeated_input() {
        let mut filter = HeadingFilter::new(0.5).unwrap();
        assert_eq!(filter.update(10.0), 5.0);
        assert_eq!(filter.update(10.0), 7.5);
        assert_eq!(filter.update(10.0), 8.75);
        assert_eq!(filter.heading(), 8.75);
    }

    #[test]
    fn test_alpha_one_tracks_input() {
        let mut filter = HeadingFilter::new(1.0).unwrap();
        assert_eq!(filter.update(42.0), 42.0);
        assert_eq!(filter.update(-7.0), -7.0);
    }

    #[test]
    fn test_rejects_invalid_alpha() {
        assert!(HeadingFilter::new(0.0).is_err());
        assert!(HeadingFilter::new(1.5).is_err());
        assert!(HeadingFilter::new(f64::NAN).is_err());
    }
}
