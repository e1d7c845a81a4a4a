//! The routing model: expanded vehicles, integer-quantized dimensions and
//! per-class shaped arc costs.
//!
//! Quantization is fixed once for the whole model: volumes are stored as
//! volume × 100, distances as whole meters, times as whole seconds. Every
//! cumulative quantity along a route (load, distance, stops, time) has a
//! per-vehicle ceiling checked by [`RoutingModel::route_feasible`].

use std::sync::Arc;

use crate::config::MainConfig;
use crate::domain::types::{Customer, VehicleClass};
use crate::error::{Error, Result};
use crate::matrix::DistanceMatrix;

/// Volumes are carried as integer hundredths of a stack unit.
pub const VOLUME_SCALE: f64 = 100.0;
/// Ceiling stand-in for vehicles without a distance or stop cap, small
/// enough that sums of arc values can never overflow.
pub const UNCAPPED: i64 = i64::MAX / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Depot,
    /// Index into the served-customer list.
    Customer(usize),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub coordinates: (f64, f64),
    /// Demand in volume hundredths; zero at depots.
    pub demand: i64,
    pub in_center_zone: bool,
}

impl Node {
    pub fn is_customer(&self) -> bool {
        matches!(self.kind, NodeKind::Customer(_))
    }
}

/// One routing-model vehicle. Fleet entries with count = c expand into c of
/// these, all sharing the class parameters.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub class: VehicleClass,
    /// Ordinal within the class (0-based).
    pub ordinal: usize,
    /// Index into [`RoutingModel::classes`], used to pick the arc evaluator.
    pub class_index: usize,
    /// Depot node this vehicle starts and ends at.
    pub start_node: usize,
    pub capacity: i64,
    pub max_distance_m: i64,
    pub max_stops: i64,
    pub max_time_s: i64,
    pub start_time_s: i64,
    pub service_time_s: i64,
}

/// How in-zone arcs are priced for one vehicle class.
#[derive(Debug, Clone, Copy)]
pub enum ZoneShaping {
    /// Multiplier on the base cost (the center class rebate).
    Discount(f64),
    /// Flat surcharge on the base cost.
    Penalty(i64),
}

/// One arc-cost evaluator per vehicle *class*, not per vehicle.
#[derive(Debug, Clone)]
pub struct ClassCosts {
    pub class: VehicleClass,
    pub shaping: ZoneShaping,
}

/// Cumulative route quantities; `time_s` includes the vehicle start offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteDims {
    pub load: i64,
    pub distance_m: i64,
    pub stops: i64,
    pub time_s: i64,
}

#[derive(Debug)]
pub struct RoutingModel {
    pub nodes: Vec<Node>,
    pub vehicles: Vec<Vehicle>,
    pub classes: Vec<ClassCosts>,
    pub matrix: Arc<DistanceMatrix>,
    /// `Some(penalty)` when the solver may drop customers.
    pub skip_penalty: Option<i64>,
    pub num_depots: usize,
    symmetric_zone: bool,
}

fn same_place(a: (f64, f64), b: (f64, f64)) -> bool {
    (a.0 - b.0).abs() < 1e-7 && (a.1 - b.1).abs() < 1e-7
}

impl RoutingModel {
    /// Build the model over `depots` (main depot first) and `served`
    /// customers, in matrix index order.
    pub fn build(
        served: &[Customer],
        depots: &[(f64, f64)],
        config: &MainConfig,
        matrix: Arc<DistanceMatrix>,
    ) -> Result<Self> {
        if depots.is_empty() {
            return Err(Error::InvalidInput("no depots supplied".to_string()));
        }
        if matrix.len() != depots.len() + served.len() {
            return Err(Error::InvalidInput(format!(
                "matrix covers {} locations, model needs {}",
                matrix.len(),
                depots.len() + served.len()
            )));
        }

        let zone = config.center_zone.zone();
        let mut nodes: Vec<Node> = depots
            .iter()
            .map(|&coordinates| Node {
                kind: NodeKind::Depot,
                coordinates,
                demand: 0,
                in_center_zone: false,
            })
            .collect();
        for (idx, customer) in served.iter().enumerate() {
            let coordinates = customer.coordinates.ok_or_else(|| {
                Error::InvalidInput(format!(
                    "served customer {} reached the solver without coordinates",
                    customer.id
                ))
            })?;
            nodes.push(Node {
                kind: NodeKind::Customer(idx),
                coordinates,
                demand: (customer.volume * VOLUME_SCALE).round() as i64,
                in_center_zone: zone.contains(coordinates),
            });
        }

        // One evaluator per distinct class tag.
        let mut classes: Vec<ClassCosts> = Vec::new();
        let mut vehicles: Vec<Vehicle> = Vec::new();
        for fleet_entry in config.enabled_fleet() {
            let class_index = classes
                .iter()
                .position(|c| c.class == fleet_entry.class)
                .unwrap_or_else(|| {
                    let shaping = if fleet_entry.class == config.center_zone.center_class {
                        ZoneShaping::Discount(config.center_zone.discount_for_center_class)
                    } else {
                        ZoneShaping::Penalty(config.center_zone.penalty_for_others)
                    };
                    classes.push(ClassCosts {
                        class: fleet_entry.class.clone(),
                        shaping,
                    });
                    classes.len() - 1
                });

            let start = fleet_entry.start_location.unwrap_or(config.depot_location);
            let start_node = depots
                .iter()
                .position(|&d| same_place(d, start))
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "start location {:?} of class {} is not among the depots",
                        start, fleet_entry.class
                    ))
                })?;

            for ordinal in 0..fleet_entry.count as usize {
                vehicles.push(Vehicle {
                    class: fleet_entry.class.clone(),
                    ordinal,
                    class_index,
                    start_node,
                    capacity: fleet_entry.capacity as i64 * VOLUME_SCALE as i64,
                    max_distance_m: fleet_entry
                        .max_distance_km
                        .map(|km| (km * 1000.0).round() as i64)
                        .unwrap_or(UNCAPPED),
                    max_stops: fleet_entry
                        .max_customers_per_route
                        .map(|n| n as i64)
                        .unwrap_or(UNCAPPED),
                    max_time_s: fleet_entry.max_time_minutes as i64 * 60,
                    start_time_s: fleet_entry.start_time_minutes as i64 * 60,
                    service_time_s: fleet_entry.service_time_minutes as i64 * 60,
                });
            }
        }

        let skip_penalty = config
            .solver
            .allow_customer_skipping
            .then_some(config.solver.skip_penalty);

        let model = Self {
            nodes,
            vehicles,
            classes,
            matrix,
            skip_penalty,
            num_depots: depots.len(),
            symmetric_zone: config.center_zone.symmetric,
        };
        model.check_trivial_feasibility()?;
        Ok(model)
    }

    /// Rejects models that cannot possibly carry a full assignment when
    /// skipping is disabled.
    fn check_trivial_feasibility(&self) -> Result<()> {
        if self.skip_penalty.is_some() {
            return Ok(());
        }
        let total_demand: i64 = self.nodes.iter().map(|n| n.demand).sum();
        let total_capacity: i64 = self.vehicles.iter().map(|v| v.capacity).sum();
        if total_demand > total_capacity {
            return Err(Error::ModelInfeasible(format!(
                "total demand {} exceeds total fleet capacity {} and skipping is disabled",
                total_demand as f64 / VOLUME_SCALE,
                total_capacity as f64 / VOLUME_SCALE
            )));
        }
        let max_capacity = self.vehicles.iter().map(|v| v.capacity).max().unwrap_or(0);
        if let Some(node) = self.nodes.iter().find(|n| n.demand > max_capacity) {
            return Err(Error::ModelInfeasible(format!(
                "a customer demands {} but the largest vehicle holds {}",
                node.demand as f64 / VOLUME_SCALE,
                max_capacity as f64 / VOLUME_SCALE
            )));
        }
        Ok(())
    }

    pub fn num_customers(&self) -> usize {
        self.nodes.len() - self.num_depots
    }

    /// All customer node indices.
    pub fn customer_nodes(&self) -> std::ops::Range<usize> {
        self.num_depots..self.nodes.len()
    }

    /// Real distance between nodes, quantized to whole meters.
    pub fn distance_m(&self, from: usize, to: usize) -> i64 {
        self.matrix.distance_m(from, to).round() as i64
    }

    /// Real travel time between nodes, quantized to whole seconds.
    pub fn duration_s(&self, from: usize, to: usize) -> i64 {
        self.matrix.duration_s(from, to).round() as i64
    }

    /// The objective's arc cost for a vehicle class: base distance shaped by
    /// the center zone. The Distance dimension always uses the unshaped
    /// meters, so the shaping never affects feasibility or reported totals.
    pub fn arc_cost(&self, class_index: usize, from: usize, to: usize) -> i64 {
        let base = self.distance_m(from, to);
        let arriving = self.nodes[to].is_customer() && self.nodes[to].in_center_zone;
        let leaving =
            self.symmetric_zone && self.nodes[from].is_customer() && self.nodes[from].in_center_zone;
        if !(arriving || leaving) {
            return base;
        }
        match self.classes[class_index].shaping {
            ZoneShaping::Discount(factor) => (base as f64 * factor).round() as i64,
            ZoneShaping::Penalty(penalty) => base + penalty,
        }
    }

    /// Walk a route (depot → customers → depot) accumulating all four
    /// dimensions. Service time applies at customer arrivals only.
    pub fn route_dims(&self, vehicle_idx: usize, customers: &[usize]) -> RouteDims {
        let vehicle = &self.vehicles[vehicle_idx];
        let mut dims = RouteDims {
            time_s: vehicle.start_time_s,
            ..RouteDims::default()
        };
        if customers.is_empty() {
            return dims;
        }
        let mut current = vehicle.start_node;
        for &node in customers {
            dims.distance_m += self.distance_m(current, node);
            dims.time_s += self.duration_s(current, node) + vehicle.service_time_s;
            dims.load += self.nodes[node].demand;
            dims.stops += 1;
            current = node;
        }
        dims.distance_m += self.distance_m(current, vehicle.start_node);
        dims.time_s += self.duration_s(current, vehicle.start_node);
        dims
    }

    /// All four dimension ceilings at once.
    pub fn route_feasible(&self, vehicle_idx: usize, customers: &[usize]) -> bool {
        let vehicle = &self.vehicles[vehicle_idx];
        let dims = self.route_dims(vehicle_idx, customers);
        dims.load <= vehicle.capacity
            && dims.distance_m <= vehicle.max_distance_m
            && dims.stops <= vehicle.max_stops
            && dims.time_s <= vehicle.max_time_s
    }

    /// Shaped objective contribution of one route.
    pub fn route_shaped_cost(&self, vehicle_idx: usize, customers: &[usize]) -> i64 {
        if customers.is_empty() {
            return 0;
        }
        let vehicle = &self.vehicles[vehicle_idx];
        let class = vehicle.class_index;
        let mut cost = 0;
        let mut current = vehicle.start_node;
        for &node in customers {
            cost += self.arc_cost(class, current, node);
            current = node;
        }
        cost + self.arc_cost(class, current, vehicle.start_node)
    }

    /// Displayed totals for one route, re-summed from the unshaped matrices:
    /// (distance km, duration minutes including service time).
    pub fn route_real_totals(&self, vehicle_idx: usize, customers: &[usize]) -> (f64, f64) {
        if customers.is_empty() {
            return (0.0, 0.0);
        }
        let vehicle = &self.vehicles[vehicle_idx];
        let mut meters = 0.0;
        let mut seconds = 0.0;
        let mut current = vehicle.start_node;
        for &node in customers {
            meters += self.matrix.distance_m(current, node);
            seconds += self.matrix.duration_s(current, node) + vehicle.service_time_s as f64;
            current = node;
        }
        meters += self.matrix.distance_m(current, vehicle.start_node);
        seconds += self.matrix.duration_s(current, vehicle.start_node);
        (meters / 1000.0, seconds / 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MainConfig, VehicleConfig};
    use crate::test_support::{haversine_matrix, small_config};

    fn model_with(customers: &[Customer], config: &MainConfig) -> RoutingModel {
        let depots = vec![config.depot_location];
        let matrix = Arc::new(haversine_matrix(&depots, customers));
        RoutingModel::build(customers, &depots, config, matrix).unwrap()
    }

    fn customer_at(id: &str, coords: (f64, f64), volume: f64) -> Customer {
        Customer::new(id, id, Some(coords), volume, format!("{},{}", coords.0, coords.1))
    }

    #[test]
    fn demand_quantizes_to_hundredths() {
        let config = small_config();
        let customers = vec![customer_at("a", (42.71, 23.33), 7.25)];
        let model = model_with(&customers, &config);
        assert_eq!(model.nodes[1].demand, 725);
    }

    #[test]
    fn vehicles_expand_per_count() {
        let mut config = small_config();
        config.fleet = vec![
            VehicleConfig {
                class: "INTERNAL".into(),
                capacity: 100,
                count: 3,
                ..VehicleConfig::default()
            },
            VehicleConfig {
                class: "CENTER".into(),
                capacity: 50,
                count: 1,
                start_location: Some((config.center_zone.center_lat, config.center_zone.center_lon)),
                ..VehicleConfig::default()
            },
        ];
        let customers = vec![customer_at("a", (42.71, 23.33), 5.0)];
        let depots = vec![
            config.depot_location,
            (config.center_zone.center_lat, config.center_zone.center_lon),
        ];
        let matrix = Arc::new(haversine_matrix(&depots, &customers));
        let model = RoutingModel::build(&customers, &depots, &config, matrix).unwrap();

        assert_eq!(model.vehicles.len(), 4);
        assert_eq!(model.classes.len(), 2);
        assert_eq!(model.vehicles[3].start_node, 1);
        // The three INTERNAL vehicles share one evaluator.
        assert_eq!(model.vehicles[0].class_index, model.vehicles[2].class_index);
    }

    #[test]
    fn center_zone_shapes_only_the_objective() {
        let config = small_config();
        let zone_center = (config.center_zone.center_lat, config.center_zone.center_lon);
        let customers = vec![customer_at("in-zone", zone_center, 5.0)];
        let model = model_with(&customers, &config);

        let center_class = model
            .classes
            .iter()
            .position(|c| c.class == VehicleClass::new("CENTER"))
            .unwrap();
        let other_class = model
            .classes
            .iter()
            .position(|c| c.class == VehicleClass::new("INTERNAL"))
            .unwrap();

        let base = model.distance_m(0, 1);
        assert_eq!(
            model.arc_cost(center_class, 0, 1),
            (base as f64 * 0.10).round() as i64
        );
        assert_eq!(model.arc_cost(other_class, 0, 1), base + 40_000);
        // Leaving the zone is unshaped by default.
        assert_eq!(model.arc_cost(other_class, 1, 0), model.distance_m(1, 0));
    }

    #[test]
    fn route_dims_accumulate_service_time() {
        let config = small_config();
        let customers = vec![
            customer_at("a", (42.71, 23.33), 5.0),
            customer_at("b", (42.72, 23.35), 7.0),
        ];
        let model = model_with(&customers, &config);
        let dims = model.route_dims(0, &[1, 2]);

        assert_eq!(dims.stops, 2);
        assert_eq!(dims.load, 1200);
        let vehicle = &model.vehicles[0];
        let travel = model.duration_s(0, 1) + model.duration_s(1, 2) + model.duration_s(2, 0);
        assert_eq!(
            dims.time_s,
            vehicle.start_time_s + travel + 2 * vehicle.service_time_s
        );
    }

    #[test]
    fn infeasible_total_demand_rejected_without_skipping() {
        let mut config = small_config();
        config.solver.allow_customer_skipping = false;
        config.fleet = vec![VehicleConfig {
            class: "INTERNAL".into(),
            capacity: 10,
            count: 1,
            ..VehicleConfig::default()
        }];
        let customers = vec![
            customer_at("a", (42.71, 23.33), 8.0),
            customer_at("b", (42.72, 23.35), 8.0),
        ];
        let depots = vec![config.depot_location];
        let matrix = Arc::new(haversine_matrix(&depots, &customers));
        let err = RoutingModel::build(&customers, &depots, &config, matrix).unwrap_err();
        assert!(matches!(err, Error::ModelInfeasible(_)));
    }

    #[test]
    fn real_totals_ignore_shaping() {
        let config = small_config();
        let zone_center = (config.center_zone.center_lat, config.center_zone.center_lon);
        let customers = vec![customer_at("in-zone", zone_center, 5.0)];
        let model = model_with(&customers, &config);

        let internal = model
            .vehicles
            .iter()
            .position(|v| v.class == VehicleClass::new("INTERNAL"))
            .unwrap();
        let (km, _) = model.route_real_totals(internal, &[1]);
        let raw_km =
            (model.matrix.distance_m(0, 1) + model.matrix.distance_m(1, 0)) / 1000.0;
        assert!((km - raw_km).abs() < 1e-9);
        // The shaped cost for a non-center vehicle is far larger.
        assert!(model.route_shaped_cost(internal, &[1]) > (raw_km * 1000.0) as i64);
    }
}
