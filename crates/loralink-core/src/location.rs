//! Geographic position attached to text messages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale between degrees and the on-air micro-degree integers
pub const MICRO_DEGREES: f64 = 1_000_000.0;

/// Position in micro-degrees (degrees × 1,000,000)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in micro-degrees
    pub lat_micro: i32,
    /// Longitude in micro-degrees
    pub lon_micro: i32,
}

impl Location {
    /// Create a location from raw micro-degree values
    pub fn new(lat_micro: i32, lon_micro: i32) -> Self {
        Self {
            lat_micro,
            lon_micro,
        }
    }

    /// Create a location from floating-point degrees, rounding to the
    /// nearest micro-degree
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            lat_micro: (latitude * MICRO_DEGREES).round() as i32,
            lon_micro: (longitude * MICRO_DEGREES).round() as i32,
        }
    }

    /// Latitude in degrees
    pub fn latitude(&self) -> f64 {
        f64::from(self.lat_micro) / MICRO_DEGREES
    }

    /// Longitude in degrees
    pub fn longitude(&self) -> f64 {
        f64::from(self.lon_micro) / MICRO_DEGREES
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude(), self.longitude())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degree_conversion() {
        let loc = Location::from_degrees(37.7742, -122.4192);
        assert_eq!(loc.lat_micro, 37_774_200);
        assert_eq!(loc.lon_micro, -122_419_200);
        assert!((loc.latitude() - 37.7742).abs() < 1e-9);
    }

    #[test]
    fn test_display() {
        let loc = Location::new(40_712_800, -74_006_000);
        assert_eq!(loc.to_string(), "40.712800,-74.006000");
    }
}
