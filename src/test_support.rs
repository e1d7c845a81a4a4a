//! Test-only helpers: offline matrices and small fleet configurations used
//! by unit and integration tests.

use crate::config::{MainConfig, VehicleConfig};
use crate::domain::types::Customer;
use crate::geo;
use crate::matrix::DistanceMatrix;

/// Duration assumed for synthetic matrices, matching the offline fallback.
const SPEED_KMH: f64 = 40.0;

/// Build a matrix over depots-then-customers from raw great-circle
/// distances, so tests never touch the network.
pub fn haversine_matrix(depots: &[(f64, f64)], customers: &[Customer]) -> DistanceMatrix {
    let mut locations: Vec<(f64, f64)> = depots.to_vec();
    locations.extend(
        customers
            .iter()
            .map(|c| c.coordinates.expect("test customer has coordinates")),
    );
    let n = locations.len();
    let mut distances = vec![vec![0.0; n]; n];
    let mut durations = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                let d = geo::haversine_m(locations[i], locations[j]);
                distances[i][j] = d;
                durations[i][j] = d / (SPEED_KMH / 3.6);
            }
        }
    }
    DistanceMatrix {
        locations,
        distances,
        durations,
    }
}

/// A config with the stock center zone but a small, predictable fleet:
/// two INTERNAL vans and one CENTER van, all starting at the main depot.
pub fn small_config() -> MainConfig {
    let mut config = MainConfig::default();
    config.depot_location = (42.70, 23.32);
    config.fleet = vec![
        VehicleConfig {
            class: "INTERNAL".into(),
            capacity: 30,
            count: 2,
            max_time_minutes: 480,
            service_time_minutes: 8,
            ..VehicleConfig::default()
        },
        VehicleConfig {
            class: "CENTER".into(),
            capacity: 30,
            count: 1,
            max_time_minutes: 480,
            service_time_minutes: 8,
            ..VehicleConfig::default()
        },
    ];
    config.solver.time_limit_seconds = 2;
    config.matrix.primary_endpoint = None;
    config.matrix.fallback_endpoint = None;
    config.cache.enabled = false;
    config
}

/// Shorthand for a test customer with valid coordinates.
pub fn customer_at(id: &str, coords: (f64, f64), volume: f64) -> Customer {
    Customer::new(
        id,
        id,
        Some(coords),
        volume,
        format!("{}, {}", coords.0, coords.1),
    )
}
