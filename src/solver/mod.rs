//! CVRP solver: routing model, first-solution strategies, metaheuristic
//! improvement, the parallel strategy race and the per-route TSP pass.

pub mod construction;
pub mod local_search;
pub mod model;
pub mod racer;
pub mod tsp;

pub use construction::FirstSolution;
pub use local_search::Metaheuristic;
pub use model::RoutingModel;
pub use racer::{race, StrategyPair};

/// A working assignment: one customer-node sequence per model vehicle, plus
/// the customers the solver decided to drop.
#[derive(Debug, Clone)]
pub struct SolverState {
    pub routes: Vec<Vec<usize>>,
    pub dropped: Vec<usize>,
}

impl SolverState {
    pub fn empty(model: &RoutingModel) -> Self {
        Self {
            routes: vec![Vec::new(); model.vehicles.len()],
            dropped: Vec::new(),
        }
    }

    /// Shaped objective: route costs plus the disjunction penalty for every
    /// dropped customer.
    pub fn objective(&self, model: &RoutingModel) -> i64 {
        let routed: i64 = self
            .routes
            .iter()
            .enumerate()
            .map(|(v, route)| model.route_shaped_cost(v, route))
            .sum();
        routed + model.skip_penalty.unwrap_or(0) * self.dropped.len() as i64
    }

    /// Total real driving distance in meters, unshaped.
    pub fn total_real_distance_m(&self, model: &RoutingModel) -> f64 {
        self.routes
            .iter()
            .enumerate()
            .map(|(v, route)| model.route_real_totals(v, route).0 * 1000.0)
            .sum()
    }

    pub fn vehicles_used(&self) -> usize {
        self.routes.iter().filter(|r| !r.is_empty()).count()
    }

    pub fn assigned_count(&self) -> usize {
        self.routes.iter().map(|r| r.len()).sum()
    }

    /// Every route keeps all four dimensions under its vehicle's ceilings.
    pub fn is_feasible(&self, model: &RoutingModel) -> bool {
        self.routes
            .iter()
            .enumerate()
            .all(|(v, route)| model.route_feasible(v, route))
    }
}
