//! Result model: routes, overflow and whole-solution validation.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::MainConfig;
use crate::domain::types::{Customer, VehicleClass};

/// Why a customer ended up unserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverflowReason {
    InvalidCoordinates,
    ExceedsFleetCapacity,
    ExceedsPerCustomerPolicy,
    DroppedBySolver,
}

impl OverflowReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowReason::InvalidCoordinates => "invalid_coordinates",
            OverflowReason::ExceedsFleetCapacity => "exceeds_fleet_capacity",
            OverflowReason::ExceedsPerCustomerPolicy => "exceeds_per_customer_policy",
            OverflowReason::DroppedBySolver => "dropped_by_solver",
        }
    }
}

/// A customer that could not be served, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct UnservedCustomer {
    pub customer: Customer,
    pub reason: OverflowReason,
}

/// One vehicle's route. Totals are recomputed from the unshaped matrices,
/// never from the solver's objective.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub vehicle_class: VehicleClass,
    /// Ordinal of the vehicle within its class (0-based).
    pub vehicle_ordinal: usize,
    pub customers: Vec<Customer>,
    pub total_distance_km: f64,
    pub total_time_minutes: f64,
    pub total_volume: f64,
}

impl Route {
    pub fn stop_count(&self) -> usize {
        self.customers.len()
    }
}

/// The immutable outcome of one solve.
#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    pub routes: Vec<Route>,
    pub overflow: Vec<UnservedCustomer>,
    pub total_distance_km: f64,
    pub total_time_minutes: f64,
    pub vehicles_used: usize,
    pub solve_time_seconds: f64,
}

impl Solution {
    pub fn empty() -> Self {
        Self {
            routes: Vec::new(),
            overflow: Vec::new(),
            total_distance_km: 0.0,
            total_time_minutes: 0.0,
            vehicles_used: 0,
            solve_time_seconds: 0.0,
        }
    }

    pub fn served_count(&self) -> usize {
        self.routes.iter().map(|r| r.customers.len()).sum()
    }

    /// Checks the solution against the input set and per-vehicle ceilings.
    ///
    /// Returns a list of human-readable violations; an empty list means the
    /// solution is consistent.
    pub fn violations(&self, config: &MainConfig, input: &[Customer]) -> Vec<String> {
        let mut problems = Vec::new();

        // Partition invariant: every input customer exactly once.
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for route in &self.routes {
            for customer in &route.customers {
                *seen.entry(customer.id.as_str()).or_default() += 1;
            }
        }
        for unserved in &self.overflow {
            *seen.entry(unserved.customer.id.as_str()).or_default() += 1;
        }
        for customer in input {
            match seen.get(customer.id.as_str()) {
                Some(1) => {}
                Some(n) => problems.push(format!(
                    "customer {} appears {} times in the solution",
                    customer.id, n
                )),
                None => problems.push(format!(
                    "customer {} is missing from routes and overflow",
                    customer.id
                )),
            }
        }
        let total_assigned: usize = seen.values().sum();
        if total_assigned != input.len() {
            problems.push(format!(
                "solution covers {} customers, input has {}",
                total_assigned,
                input.len()
            ));
        }

        // Per-route ceilings against the owning vehicle class.
        let by_class: HashMap<&VehicleClass, &crate::config::VehicleConfig> = config
            .fleet
            .iter()
            .map(|v| (&v.class, v))
            .collect();
        for route in &self.routes {
            let Some(vehicle) = by_class.get(&route.vehicle_class) else {
                problems.push(format!(
                    "route owned by unknown vehicle class {}",
                    route.vehicle_class
                ));
                continue;
            };
            let load: f64 = route.customers.iter().map(|c| c.volume).sum();
            if load > vehicle.capacity as f64 + 1e-9 {
                problems.push(format!(
                    "route {}#{} load {:.1} exceeds capacity {}",
                    route.vehicle_class, route.vehicle_ordinal, load, vehicle.capacity
                ));
            }
            if route.total_time_minutes > vehicle.max_time_minutes as f64 + 1e-6 {
                problems.push(format!(
                    "route {}#{} duration {:.1} min exceeds limit {} min",
                    route.vehicle_class,
                    route.vehicle_ordinal,
                    route.total_time_minutes,
                    vehicle.max_time_minutes
                ));
            }
            if let Some(max_km) = vehicle.max_distance_km {
                if route.total_distance_km > max_km + 1e-6 {
                    problems.push(format!(
                        "route {}#{} distance {:.1} km exceeds limit {:.1} km",
                        route.vehicle_class,
                        route.vehicle_ordinal,
                        route.total_distance_km,
                        max_km
                    ));
                }
            }
            if let Some(max_stops) = vehicle.max_customers_per_route {
                if route.stop_count() > max_stops as usize {
                    problems.push(format!(
                        "route {}#{} has {} stops, limit is {}",
                        route.vehicle_class,
                        route.vehicle_ordinal,
                        route.stop_count(),
                        max_stops
                    ));
                }
            }
            for customer in &route.customers {
                if !customer.has_valid_coordinates() {
                    problems.push(format!(
                        "routed customer {} has no valid coordinates",
                        customer.id
                    ));
                }
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MainConfig;

    fn customer(id: &str, volume: f64) -> Customer {
        Customer::new(id, id, Some((42.7, 23.3)), volume, "42.7, 23.3")
    }

    fn route_of(class: &str, customers: Vec<Customer>) -> Route {
        let total_volume = customers.iter().map(|c| c.volume).sum();
        Route {
            vehicle_class: VehicleClass::new(class),
            vehicle_ordinal: 0,
            customers,
            total_distance_km: 10.0,
            total_time_minutes: 60.0,
            total_volume,
        }
    }

    #[test]
    fn clean_solution_has_no_violations() {
        let config = MainConfig::default();
        let input = vec![customer("a", 5.0), customer("b", 500.0)];
        let solution = Solution {
            routes: vec![route_of("INTERNAL", vec![input[0].clone()])],
            overflow: vec![UnservedCustomer {
                customer: input[1].clone(),
                reason: OverflowReason::ExceedsFleetCapacity,
            }],
            total_distance_km: 10.0,
            total_time_minutes: 60.0,
            vehicles_used: 1,
            solve_time_seconds: 0.1,
        };
        assert!(solution.violations(&config, &input).is_empty());
    }

    #[test]
    fn missing_and_duplicate_customers_flagged() {
        let config = MainConfig::default();
        let input = vec![customer("a", 5.0), customer("b", 5.0)];
        let solution = Solution {
            routes: vec![route_of(
                "INTERNAL",
                vec![input[0].clone(), input[0].clone()],
            )],
            overflow: Vec::new(),
            total_distance_km: 10.0,
            total_time_minutes: 60.0,
            vehicles_used: 1,
            solve_time_seconds: 0.1,
        };
        let violations = solution.violations(&config, &input);
        assert!(violations.iter().any(|v| v.contains("appears 2 times")));
        assert!(violations.iter().any(|v| v.contains("missing")));
    }

    #[test]
    fn capacity_violation_flagged() {
        let config = MainConfig::default();
        let input = vec![customer("a", 400.0)];
        let solution = Solution {
            routes: vec![route_of("INTERNAL", vec![input[0].clone()])],
            overflow: Vec::new(),
            total_distance_km: 10.0,
            total_time_minutes: 60.0,
            vehicles_used: 1,
            solve_time_seconds: 0.1,
        };
        let violations = solution.violations(&config, &input);
        assert!(violations.iter().any(|v| v.contains("exceeds capacity")));
    }
}
