//! The end-to-end solve pipeline: allocate, build the matrix, race the
//! solvers, reoptimize eligible routes and assemble the final solution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, span, warn, Instrument, Level};

use crate::allocator::{self, Allocation};
use crate::config::MainConfig;
use crate::domain::solution::{OverflowReason, Route, Solution, UnservedCustomer};
use crate::domain::types::Customer;
use crate::error::{Error, Result};
use crate::matrix::{DistanceMatrix, MatrixService};
use crate::solver::model::{NodeKind, RoutingModel};
use crate::solver::{racer, tsp, SolverState};

/// A finished run: the solution plus the matrix it was computed against,
/// which map adapters need for rendering real road geometry.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub solution: Solution,
    pub matrix: Option<Arc<DistanceMatrix>>,
}

pub struct Pipeline {
    config: MainConfig,
    matrix_service: MatrixService,
}

impl Pipeline {
    pub fn new(config: MainConfig) -> Result<Self> {
        config.validate()?;
        let matrix_service = MatrixService::new(config.matrix.clone(), config.cache.clone());
        Ok(Self {
            config,
            matrix_service,
        })
    }

    pub fn config(&self) -> &MainConfig {
        &self.config
    }

    pub fn matrix_service(&self) -> &MatrixService {
        &self.matrix_service
    }

    /// Solve one instance end to end.
    pub async fn run(&self, customers: Vec<Customer>) -> Result<PipelineOutcome> {
        let started = Instant::now();
        check_unique_ids(&customers)?;

        let allocation = {
            let _span = span!(Level::INFO, "allocation").entered();
            allocator::allocate(&customers, &self.config)
        };

        if allocation.served.is_empty() {
            info!("nothing to route; returning overflow-only solution");
            let solution = Solution {
                overflow: allocation.overflow,
                solve_time_seconds: started.elapsed().as_secs_f64(),
                ..Solution::empty()
            };
            return Ok(PipelineOutcome {
                solution,
                matrix: None,
            });
        }

        let depots = self.assemble_depots();
        let location_count = depots.len() + allocation.served.len();
        let mut locations = depots.clone();
        locations.extend(
            allocation
                .served
                .iter()
                .map(|c| c.coordinates.expect("served customers have coordinates")),
        );
        let matrix = Arc::new(
            self.matrix_service
                .matrix(&locations)
                .instrument(span!(Level::INFO, "matrix", locations = location_count))
                .await?,
        );

        let model = Arc::new(RoutingModel::build(
            &allocation.served,
            &depots,
            &self.config,
            matrix.clone(),
        )?);

        let race_result = {
            let race_model = model.clone();
            let solver_config = self.config.solver.clone();
            let race_span = span!(Level::INFO, "race");
            match tokio::task::spawn_blocking(move || {
                let _span = race_span.entered();
                racer::race(&race_model, &solver_config)
            })
            .await
            {
                Ok(result) => result,
                Err(join_error) => {
                    error!("strategy race aborted: {join_error}");
                    Err(Error::NoSolution)
                }
            }
        };

        let mut state = match race_result {
            Ok(winner) => winner.state,
            Err(Error::NoSolution) => {
                error!("no worker produced a solution; all served customers overflow");
                let solution = self.no_solution_outcome(allocation, started);
                return Ok(PipelineOutcome {
                    solution,
                    matrix: Some(matrix),
                });
            }
            Err(other) => return Err(other),
        };

        if self.config.solver.enable_tsp_reoptimization {
            let _span = span!(Level::INFO, "tsp").entered();
            tsp::reoptimize(&mut state, &model, &self.config);
        }

        let solution = self.extract(&model, &state, &allocation, started);
        for violation in solution.violations(&self.config, &customers) {
            warn!("solution violation: {violation}");
        }
        info!(
            "solved in {:.2}s: {} routes, {:.1} km, {} unserved",
            solution.solve_time_seconds,
            solution.routes.len(),
            solution.total_distance_km,
            solution.overflow.len()
        );
        Ok(PipelineOutcome {
            solution,
            matrix: Some(matrix),
        })
    }

    /// Every depot that must participate in the matrix: the main depot
    /// first, then each distinct vehicle start and TSP depot.
    fn assemble_depots(&self) -> Vec<(f64, f64)> {
        let mut depots = vec![self.config.depot_location];
        let mut push_unique = |coords: (f64, f64), depots: &mut Vec<(f64, f64)>| {
            let exists = depots
                .iter()
                .any(|d| (d.0 - coords.0).abs() < 1e-7 && (d.1 - coords.1).abs() < 1e-7);
            if !exists {
                depots.push(coords);
            }
        };
        for vehicle in self.config.enabled_fleet() {
            if let Some(start) = vehicle.start_location {
                push_unique(start, &mut depots);
            }
            if let Some(tsp_depot) = vehicle.tsp_depot_location {
                push_unique(tsp_depot, &mut depots);
            }
        }
        depots
    }

    /// Degraded outcome when the race yields nothing: every served customer
    /// joins the overflow as solver-dropped.
    fn no_solution_outcome(&self, allocation: Allocation, started: Instant) -> Solution {
        let mut overflow = allocation.overflow;
        overflow.extend(allocation.served.into_iter().map(|customer| UnservedCustomer {
            customer,
            reason: OverflowReason::DroppedBySolver,
        }));
        Solution {
            overflow,
            solve_time_seconds: started.elapsed().as_secs_f64(),
            ..Solution::empty()
        }
    }

    fn extract(
        &self,
        model: &RoutingModel,
        state: &SolverState,
        allocation: &Allocation,
        started: Instant,
    ) -> Solution {
        let mut routes = Vec::new();
        let mut total_distance_km = 0.0;
        let mut total_time_minutes = 0.0;

        for (vehicle_idx, node_route) in state.routes.iter().enumerate() {
            if node_route.is_empty() {
                continue;
            }
            let vehicle = &model.vehicles[vehicle_idx];
            let customers: Vec<Customer> = node_route
                .iter()
                .map(|&node| match model.nodes[node].kind {
                    NodeKind::Customer(idx) => allocation.served[idx].clone(),
                    NodeKind::Depot => unreachable!("routes contain customer nodes only"),
                })
                .collect();
            let (distance_km, time_minutes) = model.route_real_totals(vehicle_idx, node_route);
            total_distance_km += distance_km;
            total_time_minutes += time_minutes;
            routes.push(Route {
                vehicle_class: vehicle.class.clone(),
                vehicle_ordinal: vehicle.ordinal,
                total_volume: customers.iter().map(|c| c.volume).sum(),
                customers,
                total_distance_km: distance_km,
                total_time_minutes: time_minutes,
            });
        }

        let mut overflow = allocation.overflow.clone();
        for &node in &state.dropped {
            if let NodeKind::Customer(idx) = model.nodes[node].kind {
                overflow.push(UnservedCustomer {
                    customer: allocation.served[idx].clone(),
                    reason: OverflowReason::DroppedBySolver,
                });
            }
        }

        Solution {
            vehicles_used: routes.len(),
            routes,
            overflow,
            total_distance_km,
            total_time_minutes,
            solve_time_seconds: started.elapsed().as_secs_f64(),
        }
    }
}

fn check_unique_ids(customers: &[Customer]) -> Result<()> {
    let mut seen = HashSet::with_capacity(customers.len());
    for customer in customers {
        if !seen.insert(customer.id.as_str()) {
            return Err(Error::InvalidInput(format!(
                "duplicate customer id: {}",
                customer.id
            )));
        }
    }
    Ok(())
}
