//! Warehouse allocator: splits the customer list into the set the solver
//! will see and the overflow that stays behind, before any matrix or model
//! work happens.

use tracing::{debug, info};

use crate::config::MainConfig;
use crate::domain::solution::{OverflowReason, UnservedCustomer};
use crate::domain::types::Customer;
use crate::geo;

#[derive(Debug, Clone)]
pub struct Allocation {
    /// Customers handed to the solver, in deterministic order.
    pub served: Vec<Customer>,
    pub overflow: Vec<UnservedCustomer>,
    pub total_fleet_capacity: u64,
    pub served_volume: f64,
}

impl Allocation {
    pub fn capacity_utilization(&self) -> f64 {
        if self.total_fleet_capacity == 0 {
            0.0
        } else {
            self.served_volume / self.total_fleet_capacity as f64
        }
    }
}

/// Apply the overflow rules in order (first match wins), then sort the
/// served set: ascending volume, ties broken by descending distance to the
/// main depot. The ordering seeds the first-solution heuristics with
/// small-volume, far-away customers first.
pub fn allocate(customers: &[Customer], config: &MainConfig) -> Allocation {
    let max_vehicle_capacity = config.max_vehicle_capacity() as f64;
    let policy_ceiling = config.warehouse.max_customer_volume;
    let depot = config.depot_location;

    let mut served: Vec<Customer> = Vec::with_capacity(customers.len());
    let mut overflow: Vec<UnservedCustomer> = Vec::new();

    for customer in customers {
        let reason = if !customer.has_valid_coordinates() {
            Some(OverflowReason::InvalidCoordinates)
        } else if customer.volume > max_vehicle_capacity {
            Some(OverflowReason::ExceedsFleetCapacity)
        } else if customer.volume > policy_ceiling {
            Some(OverflowReason::ExceedsPerCustomerPolicy)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                debug!(
                    "customer {} ({} st) -> overflow: {}",
                    customer.id,
                    customer.volume,
                    reason.as_str()
                );
                overflow.push(UnservedCustomer {
                    customer: customer.clone(),
                    reason,
                });
            }
            None => served.push(customer.clone()),
        }
    }

    served.sort_by(|a, b| {
        a.volume.total_cmp(&b.volume).then_with(|| {
            let da = geo::haversine_m(a.coordinates.unwrap_or(depot), depot);
            let db = geo::haversine_m(b.coordinates.unwrap_or(depot), depot);
            db.total_cmp(&da)
        })
    });

    let served_volume: f64 = served.iter().map(|c| c.volume).sum();
    let allocation = Allocation {
        served,
        overflow,
        total_fleet_capacity: config.total_fleet_capacity(),
        served_volume,
    };
    info!(
        "allocation: {} served ({:.1} st), {} overflow, capacity utilization {:.1}%",
        allocation.served.len(),
        allocation.served_volume,
        allocation.overflow.len(),
        allocation.capacity_utilization() * 100.0
    );
    allocation
}
