//! Per-route TSP post-optimization.
//!
//! Routes owned by a class whose TSP depot differs from its start location
//! get their visit order re-optimized as a single-vehicle tour from that
//! depot, on straight-line distances. The pass is strictly a permutation:
//! no customer is added or removed, so the capacity and stop ceilings the
//! solver already satisfied cannot be crossed.

use tracing::debug;

use crate::config::MainConfig;
use crate::geo;
use crate::solver::model::RoutingModel;
use crate::solver::SolverState;

/// 2-opt passes stop after this many full sweeps without improvement.
const MAX_SWEEPS: usize = 64;

/// Reorder every eligible route in place.
pub fn reoptimize(state: &mut SolverState, model: &RoutingModel, config: &MainConfig) {
    for (vehicle_idx, route) in state.routes.iter_mut().enumerate() {
        if route.len() < 2 {
            continue;
        }
        let vehicle = &model.vehicles[vehicle_idx];
        let Some(fleet_entry) = config.fleet.iter().find(|f| f.class == vehicle.class) else {
            continue;
        };
        let start = fleet_entry
            .start_location
            .unwrap_or(config.depot_location);
        let Some(depot) = fleet_entry.tsp_depot() else {
            continue;
        };
        if geo::haversine_m(depot, start) < 1.0 {
            continue;
        }

        let before: Vec<usize> = route.clone();
        let optimized = tour_from(depot, route, model);
        if optimized != before {
            debug!(
                "tsp pass reordered route {}#{} ({} stops)",
                vehicle.class,
                vehicle.ordinal,
                route.len()
            );
        }
        *route = optimized;
    }
}

/// Nearest-neighbor tour from the depot, then 2-opt until no reversal helps.
fn tour_from(depot: (f64, f64), route: &[usize], model: &RoutingModel) -> Vec<usize> {
    let coords = |node: usize| model.nodes[node].coordinates;

    // Nearest-neighbor start.
    let mut remaining: Vec<usize> = route.to_vec();
    let mut tour: Vec<usize> = Vec::with_capacity(route.len());
    let mut current = depot;
    while !remaining.is_empty() {
        let (pick, _) = remaining
            .iter()
            .enumerate()
            .map(|(i, &node)| (i, geo::haversine_m(current, coords(node))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .expect("remaining is non-empty");
        let node = remaining.swap_remove(pick);
        current = coords(node);
        tour.push(node);
    }

    // 2-opt over the open tour anchored at the depot.
    let leg = |a: (f64, f64), b: (f64, f64)| geo::haversine_m(a, b);
    let mut improved = true;
    let mut sweeps = 0;
    while improved && sweeps < MAX_SWEEPS {
        improved = false;
        sweeps += 1;
        for i in 0..tour.len() - 1 {
            for j in i + 1..tour.len() {
                let prev = if i == 0 { depot } else { coords(tour[i - 1]) };
                let after = if j + 1 == tour.len() {
                    depot
                } else {
                    coords(tour[j + 1])
                };
                let current_len = leg(prev, coords(tour[i])) + leg(coords(tour[j]), after);
                let reversed_len = leg(prev, coords(tour[j])) + leg(coords(tour[i]), after);
                if reversed_len + 1e-9 < current_len {
                    tour[i..=j].reverse();
                    improved = true;
                }
            }
        }
    }
    tour
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleConfig;
    use crate::solver::model::RoutingModel;
    use crate::test_support::{customer_at, haversine_matrix, small_config};
    use std::sync::Arc;

    fn vratza_setup() -> (crate::config::MainConfig, Vec<crate::domain::types::Customer>) {
        let mut config = small_config();
        config.fleet = vec![VehicleConfig {
            class: "VRATZA".into(),
            capacity: 100,
            count: 1,
            start_location: Some((42.70, 23.32)),
            tsp_depot_location: Some((43.20, 23.55)),
            ..VehicleConfig::default()
        }];
        // A triangle near the VRATZA depot.
        let customers = vec![
            customer_at("a", (43.21, 23.56), 5.0),
            customer_at("b", (43.22, 23.54), 5.0),
            customer_at("c", (43.20, 23.58), 5.0),
        ];
        (config, customers)
    }

    fn tour_length(depot: (f64, f64), order: &[usize], model: &RoutingModel) -> f64 {
        let mut total = 0.0;
        let mut current = depot;
        for &node in order {
            total += geo::haversine_m(current, model.nodes[node].coordinates);
            current = model.nodes[node].coordinates;
        }
        total + geo::haversine_m(current, depot)
    }

    #[test]
    fn reoptimization_is_a_permutation() {
        let (config, customers) = vratza_setup();
        let depots = vec![config.depot_location];
        let matrix = Arc::new(haversine_matrix(&depots, &customers));
        let model = RoutingModel::build(&customers, &depots, &config, matrix).unwrap();

        let mut state = SolverState::empty(&model);
        state.routes[0] = vec![2, 1, 3];
        reoptimize(&mut state, &model, &config);

        let mut sorted = state.routes[0].clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[test]
    fn reoptimization_shortens_the_depot_tour() {
        let (config, customers) = vratza_setup();
        let depots = vec![config.depot_location];
        let matrix = Arc::new(haversine_matrix(&depots, &customers));
        let model = RoutingModel::build(&customers, &depots, &config, matrix).unwrap();
        let depot = (43.20, 23.55);

        // Deliberately bad order.
        let mut state = SolverState::empty(&model);
        state.routes[0] = vec![3, 1, 2];
        let before = tour_length(depot, &state.routes[0], &model);
        reoptimize(&mut state, &model, &config);
        let after = tour_length(depot, &state.routes[0], &model);
        assert!(after <= before + 1e-9);
    }

    #[test]
    fn routes_without_a_distinct_tsp_depot_are_untouched() {
        let mut config = small_config();
        config.fleet.truncate(1);
        let customers = vec![
            customer_at("a", (42.71, 23.33), 5.0),
            customer_at("b", (42.69, 23.30), 5.0),
        ];
        let depots = vec![config.depot_location];
        let matrix = Arc::new(haversine_matrix(&depots, &customers));
        let model = RoutingModel::build(&customers, &depots, &config, matrix).unwrap();

        let mut state = SolverState::empty(&model);
        state.routes[0] = vec![2, 1];
        reoptimize(&mut state, &model, &config);
        assert_eq!(state.routes[0], vec![2, 1]);
    }
}
