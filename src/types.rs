use serde::{Deserialize, Serialize};

/// Satellite count below which a fix is flagged as low precision.
pub const LOW_PRECISION_SATELLITES: u32 = 4;

/// One position fix as recorded by the device.
///
/// Heading is in degrees (0-360), speed in km/h. `timestamp` is whatever the
/// fix provider stamps the fix with (receiver time value or provider
/// milliseconds); the device's own monotonic clock is kept separately.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub satellites: u32,
    #[serde(default)]
    pub timestamp: u64,
}

impl PositionSample {
    pub fn new(
        latitude: f64,
        longitude: f64,
        heading: f64,
        speed: f64,
        satellites: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            latitude,
            longitude,
            heading,
            speed,
            satellites,
            timestamp,
        }
    }

    /// Usable position: enough satellites and a coordinate on the globe.
    pub fn has_fix(&self, min_satellites: u32) -> bool {
        self.satellites >= min_satellites
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }

    pub fn is_low_precision(&self) -> bool {
        self.satellites < LOW_PRECISION_SATELLITES
    }

    /// The all-zero sample the buffer starts with and averaging falls back to.
    pub fn is_empty(&self) -> bool {
        *self == PositionSample::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_requires_satellites() {
        let sample = PositionSample::new(-31.42, -64.18, 90.0, 20.0, 2, 0);
        assert!(!sample.has_fix(3));

        let sample = PositionSample::new(-31.42, -64.18, 90.0, 20.0, 3, 0);
        assert!(sample.has_fix(3));
    }

    #[test]
    fn test_fix_rejects_invalid_coordinates() {
        let sample = PositionSample::new(f64::NAN, -64.18, 0.0, 0.0, 8, 0);
        assert!(!sample.has_fix(3));

        let sample = PositionSample::new(95.0, -64.18, 0.0, 0.0, 8, 0);
        assert!(!sample.has_fix(3));
    }

    #[test]
    fn test_low_precision_flag() {
        assert!(PositionSample::new(0.0, 0.0, 0.0, 0.0, 3, 0).is_low_precision());
        assert!(!PositionSample::new(0.0, 0.0, 0.0, 0.0, 4, 0).is_low_precision());
    }

    #[test]
    fn test_deserialize_with_missing_fields() {
        let sample: PositionSample =
            serde_json::from_str(r#"{"latitude": 1.5, "longitude": 2.5}"#).unwrap();
        assert_eq!(sample.latitude, 1.5);
        assert_eq!(sample.satellites, 0);
    }
}
