//! Parallel strategy race: several (first-solution, metaheuristic) pairs
//! solve the same model concurrently and the best candidate wins.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::config::SolverConfig;
use crate::error::{Error, Result};
use crate::solver::construction::{construct, FirstSolution};
use crate::solver::local_search::{improve, Metaheuristic, SearchParams};
use crate::solver::model::RoutingModel;
use crate::solver::SolverState;

#[derive(Debug, Clone, Copy)]
pub struct StrategyPair {
    pub first: FirstSolution,
    pub metaheuristic: Metaheuristic,
}

impl StrategyPair {
    pub fn label(&self) -> String {
        format!("{}+{}", self.first.name(), self.metaheuristic.name())
    }
}

/// The fixed catalog the workers draw from, in priority order.
pub fn catalog() -> Vec<StrategyPair> {
    use FirstSolution::*;
    use Metaheuristic::*;
    vec![
        StrategyPair {
            first: Savings,
            metaheuristic: GuidedLocalSearch,
        },
        StrategyPair {
            first: RegretInsertion,
            metaheuristic: GuidedLocalSearch,
        },
        StrategyPair {
            first: GlobalCheapestArc,
            metaheuristic: GuidedLocalSearch,
        },
        StrategyPair {
            first: NearestNeighbor,
            metaheuristic: GuidedLocalSearch,
        },
        StrategyPair {
            first: Savings,
            metaheuristic: SimulatedAnnealing,
        },
        StrategyPair {
            first: CheapestInsertion,
            metaheuristic: GuidedLocalSearch,
        },
        StrategyPair {
            first: Sweep,
            metaheuristic: GuidedLocalSearch,
        },
    ]
}

#[derive(Debug)]
pub struct RaceWinner {
    pub state: SolverState,
    pub strategy: StrategyPair,
    pub real_distance_m: f64,
}

struct Candidate {
    state: SolverState,
    strategy: StrategyPair,
    real_distance_m: f64,
}

/// Run up to `worker_count` strategy workers over a shared model and pick
/// the winner: smallest real distance, then fewer vehicles used, then fewer
/// unserved customers. A crashed worker contributes no candidate; an empty
/// candidate set is `NoSolution`.
pub fn race(model: &RoutingModel, config: &SolverConfig) -> Result<RaceWinner> {
    let pairs = catalog();
    let workers = config.worker_count().min(pairs.len());
    let pairs = &pairs[..workers];
    info!(
        "racing {} strategy workers over {} customers ({}s budget each)",
        workers,
        model.num_customers(),
        config.time_limit_seconds
    );

    let candidates: Vec<Option<Candidate>> = pairs
        .par_iter()
        .enumerate()
        .map(|(index, &strategy)| {
            let params = SearchParams {
                time_budget: Duration::from_secs(config.time_limit_seconds),
                seed: config.random_seed.wrapping_add(index as u64),
                log_search: config.log_search,
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let initial = construct(model, strategy.first)?;
                Some(improve(model, initial, strategy.metaheuristic, &params))
            }));
            match outcome {
                Ok(Some(state)) => {
                    let real_distance_m = state.total_real_distance_m(model);
                    info!(
                        "worker {} ({}) finished: {:.1} km, {} vehicles, {} dropped",
                        index,
                        strategy.label(),
                        real_distance_m / 1000.0,
                        state.vehicles_used(),
                        state.dropped.len()
                    );
                    Some(Candidate {
                        state,
                        strategy,
                        real_distance_m,
                    })
                }
                Ok(None) => {
                    warn!(
                        "worker {} ({}) found no feasible first solution",
                        index,
                        strategy.label()
                    );
                    None
                }
                Err(_) => {
                    error!(
                        "worker {} ({}) crashed; continuing without it",
                        index,
                        strategy.label()
                    );
                    None
                }
            }
        })
        .collect();

    let winner = candidates
        .into_iter()
        .flatten()
        .min_by(|a, b| {
            a.real_distance_m
                .total_cmp(&b.real_distance_m)
                .then_with(|| a.state.vehicles_used().cmp(&b.state.vehicles_used()))
                .then_with(|| a.state.dropped.len().cmp(&b.state.dropped.len()))
        })
        .ok_or(Error::NoSolution)?;

    info!(
        "race won by {}: {:.1} km over {} vehicles",
        winner.strategy.label(),
        winner.real_distance_m / 1000.0,
        winner.state.vehicles_used()
    );
    Ok(RaceWinner {
        state: winner.state,
        strategy: winner.strategy,
        real_distance_m: winner.real_distance_m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::model::RoutingModel;
    use crate::test_support::{customer_at, haversine_matrix, small_config};
    use std::sync::Arc;

    #[test]
    fn race_produces_a_feasible_winner() {
        let mut config = small_config();
        config.solver.time_limit_seconds = 1;
        let customers = vec![
            customer_at("a", (42.71, 23.33), 5.0),
            customer_at("b", (42.69, 23.30), 10.0),
            customer_at("c", (42.72, 23.35), 7.0),
            customer_at("d", (42.68, 23.34), 4.0),
        ];
        let depots = vec![config.depot_location];
        let matrix = Arc::new(haversine_matrix(&depots, &customers));
        let model = RoutingModel::build(&customers, &depots, &config, matrix).unwrap();

        let winner = race(&model, &config.solver).unwrap();
        assert!(winner.state.is_feasible(&model));
        assert_eq!(
            winner.state.assigned_count() + winner.state.dropped.len(),
            4
        );
        assert!(winner.real_distance_m > 0.0);
    }

    #[test]
    fn catalog_pairs_are_distinct() {
        let pairs = catalog();
        assert_eq!(pairs.len(), 7);
        let mut labels: Vec<String> = pairs.iter().map(|p| p.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 7);
    }
}
