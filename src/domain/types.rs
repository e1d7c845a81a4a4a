use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::geo;

/// Tag identifying a vehicle class (INTERNAL, CENTER, EXTERNAL, ...).
///
/// The closed set of classes is declared by the fleet configuration; the tag
/// itself carries no behavior. Tags compare case-insensitively by being
/// normalized to upper case on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VehicleClass(String);

impl<'de> Deserialize<'de> for VehicleClass {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Normalize on the way in so config files can spell tags freely.
        Ok(VehicleClass::new(String::deserialize(deserializer)?))
    }
}

impl VehicleClass {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleClass {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// A delivery customer. Immutable once constructed by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Unique identifier within a run.
    pub id: String,
    pub name: String,
    /// (lat, lon); `None` when the raw GPS string could not be parsed.
    pub coordinates: Option<(f64, f64)>,
    /// Demand volume in stack units.
    pub volume: f64,
    /// The raw coordinate string, retained for diagnostics.
    pub raw_gps: String,
}

impl Customer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        coordinates: Option<(f64, f64)>,
        volume: f64,
        raw_gps: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            coordinates,
            volume,
            raw_gps: raw_gps.into(),
        }
    }

    /// True when the customer has coordinates that look like a real GPS fix.
    pub fn has_valid_coordinates(&self) -> bool {
        self.coordinates.is_some_and(geo::in_bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_tags_normalize() {
        assert_eq!(VehicleClass::new(" center "), VehicleClass::new("CENTER"));
        assert_eq!(VehicleClass::new("Vratza").as_str(), "VRATZA");
    }

    #[test]
    fn customer_coordinate_validity() {
        let ok = Customer::new("1", "A", Some((42.7, 23.3)), 5.0, "42.7, 23.3");
        let missing = Customer::new("2", "B", None, 5.0, "n/a");
        let zeroed = Customer::new("3", "C", Some((0.0, 0.0)), 5.0, "0,0");
        assert!(ok.has_valid_coordinates());
        assert!(!missing.has_valid_coordinates());
        assert!(!zeroed.has_valid_coordinates());
    }
}
