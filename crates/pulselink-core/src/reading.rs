//! Sensor readings as seen by the rest of the system.
//!
//! Absence of a reading is always an explicit `None`; nothing in this crate
//! substitutes a placeholder heart rate or coordinate.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Heart-rate values outside this range are treated as sensor noise.
pub const HEART_RATE_RANGE: RangeInclusive<u16> = 1..=199;

/// Returns true if `bpm` is a plausible heart-rate reading.
pub fn is_valid_heart_rate(bpm: u16) -> bool {
    HEART_RATE_RANGE.contains(&bpm)
}

/// Whether the location sensor currently has a usable GPS lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixValidity {
    /// The receiver reports an active fix (`A`).
    Valid,
    /// No fix, or the receiver reports void (`V`).
    #[default]
    Invalid,
}

impl FixValidity {
    /// Maps the NMEA-style status character reported by the sensor.
    pub fn from_status(status: &str) -> Self {
        match status.trim() {
            "A" | "a" => Self::Valid,
            _ => Self::Invalid,
        }
    }

    /// Returns true for an active fix.
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// A sensor that has never locked reports exactly 0/0, which is not a real fix.
    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Returns true if both components are finite and in range.
    pub fn in_range(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// A location sample together with the receiver's fix status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub coordinates: Coordinates,
    pub validity: FixValidity,
}

impl LocationFix {
    pub fn new(coordinates: Coordinates, validity: FixValidity) -> Self {
        Self {
            coordinates,
            validity,
        }
    }

    /// Convenience constructor for a locked fix.
    pub fn valid(latitude: f64, longitude: f64) -> Self {
        Self::new(Coordinates::new(latitude, longitude), FixValidity::Valid)
    }

    /// Returns the coordinates only if they are worth sending.
    pub fn usable(&self) -> Option<Coordinates> {
        (self.validity.is_valid()
            && !self.coordinates.is_null_island()
            && self.coordinates.in_range())
        .then_some(self.coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heart_rate_bounds() {
        assert!(!is_valid_heart_rate(0));
        assert!(is_valid_heart_rate(1));
        assert!(is_valid_heart_rate(75));
        assert!(is_valid_heart_rate(199));
        assert!(!is_valid_heart_rate(200));
    }

    #[test]
    fn fix_validity_from_status() {
        assert_eq!(FixValidity::from_status("A"), FixValidity::Valid);
        assert_eq!(FixValidity::from_status(" a "), FixValidity::Valid);
        assert_eq!(FixValidity::from_status("V"), FixValidity::Invalid);
        assert_eq!(FixValidity::from_status(""), FixValidity::Invalid);
    }

    #[test]
    fn usable_requires_valid_nonzero_fix() {
        assert!(LocationFix::valid(39.9, 116.4).usable().is_some());
        assert!(LocationFix::valid(0.0, 0.0).usable().is_none());
        assert!(LocationFix::valid(91.0, 10.0).usable().is_none());

        let void = LocationFix::new(Coordinates::new(39.9, 116.4), FixValidity::Invalid);
        assert!(void.usable().is_none());
    }

    #[test]
    fn coordinates_display() {
        let c = Coordinates::new(48.8566, 2.3522);
        assert_eq!(c.to_string(), "48.856600, 2.352200");
    }
}
