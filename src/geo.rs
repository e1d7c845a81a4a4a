//! Geographic primitives: great-circle distance, coordinate sanity checks
//! and center-zone membership.

use geo::{point, HaversineDistance};
use serde::{Deserialize, Serialize};

/// Great-circle distance in meters between two (lat, lon) points.
pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let a = point!(x: from.1, y: from.0);
    let b = point!(x: to.1, y: to.0);
    a.haversine_distance(&b)
}

/// Checks that a coordinate pair is a plausible GPS fix.
///
/// (0, 0) is rejected as well: it is the usual artifact of a failed
/// coordinate parse upstream.
pub fn in_bounds(coords: (f64, f64)) -> bool {
    let (lat, lon) = coords;
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
        && !(lat == 0.0 && lon == 0.0)
}

/// A circular downtown zone with special routing costs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CenterZone {
    pub center: (f64, f64),
    pub radius_km: f64,
}

impl CenterZone {
    pub fn new(center: (f64, f64), radius_km: f64) -> Self {
        Self { center, radius_km }
    }

    /// A point is inside the zone iff its great-circle distance to the zone
    /// center is at most the radius.
    pub fn contains(&self, coords: (f64, f64)) -> bool {
        haversine_m(self.center, coords) <= self.radius_km * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_same_point() {
        let p = (42.697, 23.321);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn haversine_known_distance() {
        // Sofia city center to Plovdiv is roughly 133 km as the crow flies.
        let sofia = (42.6977, 23.3219);
        let plovdiv = (42.1354, 24.7453);
        let d = haversine_m(sofia, plovdiv);
        assert!((125_000.0..145_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn bounds_reject_invalid() {
        assert!(in_bounds((42.7, 23.3)));
        assert!(!in_bounds((0.0, 0.0)));
        assert!(!in_bounds((91.0, 23.3)));
        assert!(!in_bounds((42.7, 181.0)));
        assert!(!in_bounds((f64::NAN, 23.3)));
    }

    #[test]
    fn zone_membership() {
        let zone = CenterZone::new((42.6977, 23.3216), 1.8);
        assert!(zone.contains((42.6977, 23.3216)));
        // ~700 m north of the center.
        assert!(zone.contains((42.7040, 23.3216)));
        // ~5 km away.
        assert!(!zone.contains((42.7427, 23.3216)));
    }
}
