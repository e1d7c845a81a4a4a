//! First-solution strategies.
//!
//! Every strategy honors all four dimension ceilings while it builds, so a
//! returned state is feasible by construction. Customers that cannot be
//! placed anywhere are dropped when skipping is enabled; otherwise the
//! strategy reports failure and the worker surfaces `NoSolution`.

use tracing::debug;

use crate::solver::model::{RouteDims, RoutingModel};
use crate::solver::SolverState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstSolution {
    /// Clarke-Wright savings merges.
    Savings,
    /// Per-vehicle path building, always appending the nearest feasible arc.
    NearestNeighbor,
    /// Path building that always extends the globally cheapest open arc.
    GlobalCheapestArc,
    /// Globally cheapest feasible insertion across all routes and positions.
    CheapestInsertion,
    /// Regret-2 insertion: place the customer that would lose the most by
    /// waiting.
    RegretInsertion,
    /// Polar-angle sweep around the main depot.
    Sweep,
}

impl FirstSolution {
    pub fn name(&self) -> &'static str {
        match self {
            FirstSolution::Savings => "savings",
            FirstSolution::NearestNeighbor => "nearest_neighbor",
            FirstSolution::GlobalCheapestArc => "global_cheapest_arc",
            FirstSolution::CheapestInsertion => "cheapest_insertion",
            FirstSolution::RegretInsertion => "regret_insertion",
            FirstSolution::Sweep => "sweep",
        }
    }
}

/// Build a first solution. `None` means no feasible full assignment exists
/// and skipping is disabled.
pub fn construct(model: &RoutingModel, strategy: FirstSolution) -> Option<SolverState> {
    let mut builder = Builder::new(model);
    let mut unassigned: Vec<usize> = model.customer_nodes().collect();

    match strategy {
        FirstSolution::Savings => builder.savings(&mut unassigned),
        FirstSolution::NearestNeighbor => builder.path_building(&mut unassigned, false),
        FirstSolution::GlobalCheapestArc => builder.path_building(&mut unassigned, true),
        FirstSolution::CheapestInsertion => builder.cheapest_insertion(&mut unassigned),
        FirstSolution::RegretInsertion => builder.regret_insertion(&mut unassigned),
        FirstSolution::Sweep => builder.sweep(&mut unassigned),
    }

    // Whatever the strategy left behind gets one more insertion attempt
    // before it is declared unplaceable.
    unassigned.retain(|&node| builder.insert_at_best(node).is_none());

    if !unassigned.is_empty() && model.skip_penalty.is_none() {
        debug!(
            "{} left {} customers unplaced with skipping disabled",
            strategy.name(),
            unassigned.len()
        );
        return None;
    }

    Some(SolverState {
        routes: builder.routes,
        dropped: unassigned,
    })
}

/// An insertion candidate: vehicle, position and shaped cost delta.
#[derive(Debug, Clone, Copy)]
struct Insertion {
    vehicle: usize,
    position: usize,
    delta: i64,
}

struct Builder<'a> {
    model: &'a RoutingModel,
    routes: Vec<Vec<usize>>,
    dims: Vec<RouteDims>,
}

impl<'a> Builder<'a> {
    fn new(model: &'a RoutingModel) -> Self {
        let routes = vec![Vec::new(); model.vehicles.len()];
        let dims = (0..model.vehicles.len())
            .map(|v| model.route_dims(v, &[]))
            .collect();
        Self {
            model,
            routes,
            dims,
        }
    }

    /// Endpoints around a position in a route; both are the start depot for
    /// an empty route.
    fn neighbors_at(&self, vehicle: usize, position: usize) -> (usize, usize) {
        let depot = self.model.vehicles[vehicle].start_node;
        let route = &self.routes[vehicle];
        let prev = if position == 0 {
            depot
        } else {
            route[position - 1]
        };
        let next = if position == route.len() {
            depot
        } else {
            route[position]
        };
        (prev, next)
    }

    /// Constant-time feasibility + shaped delta for inserting `node` at
    /// `position`. Insertion position does not change the time ceiling math
    /// because there are no time windows.
    fn evaluate_insertion(&self, vehicle: usize, position: usize, node: usize) -> Option<i64> {
        let limits = &self.model.vehicles[vehicle];
        let dims = &self.dims[vehicle];
        let (prev, next) = self.neighbors_at(vehicle, position);

        if dims.load + self.model.nodes[node].demand > limits.capacity {
            return None;
        }
        if dims.stops + 1 > limits.max_stops {
            return None;
        }
        let distance_delta = self.model.distance_m(prev, node) + self.model.distance_m(node, next)
            - self.model.distance_m(prev, next);
        if dims.distance_m + distance_delta > limits.max_distance_m {
            return None;
        }
        let time_delta = self.model.duration_s(prev, node) + self.model.duration_s(node, next)
            - self.model.duration_s(prev, next)
            + limits.service_time_s;
        if dims.time_s + time_delta > limits.max_time_s {
            return None;
        }

        let class = limits.class_index;
        Some(
            self.model.arc_cost(class, prev, node) + self.model.arc_cost(class, node, next)
                - self.model.arc_cost(class, prev, next),
        )
    }

    fn apply(&mut self, insertion: Insertion, node: usize) {
        self.routes[insertion.vehicle].insert(insertion.position, node);
        self.dims[insertion.vehicle] = self
            .model
            .route_dims(insertion.vehicle, &self.routes[insertion.vehicle]);
    }

    /// Best feasible insertion of `node` anywhere.
    fn best_insertion(&self, node: usize) -> Option<Insertion> {
        let mut best: Option<Insertion> = None;
        for vehicle in 0..self.routes.len() {
            for position in 0..=self.routes[vehicle].len() {
                if let Some(delta) = self.evaluate_insertion(vehicle, position, node) {
                    if best.is_none_or(|b| delta < b.delta) {
                        best = Some(Insertion {
                            vehicle,
                            position,
                            delta,
                        });
                    }
                }
            }
        }
        best
    }

    fn insert_at_best(&mut self, node: usize) -> Option<Insertion> {
        let insertion = self.best_insertion(node)?;
        self.apply(insertion, node);
        Some(insertion)
    }

    /// Nearest-neighbor path building. With `global` set, the cheapest open
    /// (route end, customer) arc across all vehicles is extended instead of
    /// finishing one vehicle at a time.
    fn path_building(&mut self, unassigned: &mut Vec<usize>, global: bool) {
        if global {
            loop {
                let mut best: Option<(usize, usize, i64)> = None;
                for vehicle in 0..self.routes.len() {
                    let position = self.routes[vehicle].len();
                    for &node in unassigned.iter() {
                        if let Some(delta) = self.evaluate_insertion(vehicle, position, node) {
                            if best.is_none_or(|(_, _, d)| delta < d) {
                                best = Some((vehicle, node, delta));
                            }
                        }
                    }
                }
                let Some((vehicle, node, delta)) = best else {
                    break;
                };
                self.apply(
                    Insertion {
                        vehicle,
                        position: self.routes[vehicle].len(),
                        delta,
                    },
                    node,
                );
                unassigned.retain(|&n| n != node);
            }
        } else {
            for vehicle in 0..self.routes.len() {
                loop {
                    let position = self.routes[vehicle].len();
                    let mut best: Option<(usize, i64)> = None;
                    for &node in unassigned.iter() {
                        if let Some(delta) = self.evaluate_insertion(vehicle, position, node) {
                            if best.is_none_or(|(_, d)| delta < d) {
                                best = Some((node, delta));
                            }
                        }
                    }
                    let Some((node, delta)) = best else {
                        break;
                    };
                    self.apply(
                        Insertion {
                            vehicle,
                            position,
                            delta,
                        },
                        node,
                    );
                    unassigned.retain(|&n| n != node);
                }
            }
        }
    }

    /// Repeatedly perform the globally cheapest feasible insertion.
    fn cheapest_insertion(&mut self, unassigned: &mut Vec<usize>) {
        loop {
            let mut best: Option<(usize, Insertion)> = None;
            for &node in unassigned.iter() {
                if let Some(insertion) = self.best_insertion(node) {
                    if best
                        .as_ref()
                        .is_none_or(|(_, b)| insertion.delta < b.delta)
                    {
                        best = Some((node, insertion));
                    }
                }
            }
            let Some((node, insertion)) = best else {
                break;
            };
            self.apply(insertion, node);
            unassigned.retain(|&n| n != node);
        }
    }

    /// Regret-2: insert the customer whose second-best placement is worst
    /// relative to its best, so scarce spots are claimed first.
    fn regret_insertion(&mut self, unassigned: &mut Vec<usize>) {
        loop {
            let mut chosen: Option<(usize, Insertion, i64)> = None;
            for &node in unassigned.iter() {
                let mut best: Option<Insertion> = None;
                let mut second: Option<i64> = None;
                for vehicle in 0..self.routes.len() {
                    for position in 0..=self.routes[vehicle].len() {
                        if let Some(delta) = self.evaluate_insertion(vehicle, position, node) {
                            match best {
                                Some(b) if delta < b.delta => {
                                    second = Some(b.delta);
                                    best = Some(Insertion {
                                        vehicle,
                                        position,
                                        delta,
                                    });
                                }
                                Some(b) => {
                                    if second.is_none_or(|s| delta < s) && delta >= b.delta {
                                        second = Some(delta);
                                    }
                                }
                                None => {
                                    best = Some(Insertion {
                                        vehicle,
                                        position,
                                        delta,
                                    })
                                }
                            }
                        }
                    }
                }
                if let Some(best_insertion) = best {
                    // Single-option customers get top priority.
                    let regret = second
                        .map(|s| s - best_insertion.delta)
                        .unwrap_or(i64::MAX / 2);
                    if chosen.as_ref().is_none_or(|(_, _, r)| regret > *r) {
                        chosen = Some((node, best_insertion, regret));
                    }
                }
            }
            let Some((node, insertion, _)) = chosen else {
                break;
            };
            self.apply(insertion, node);
            unassigned.retain(|&n| n != node);
        }
    }

    /// Clarke-Wright savings over the main depot, followed by assignment of
    /// the merged sequences to concrete vehicles.
    fn savings(&mut self, unassigned: &mut Vec<usize>) {
        let model = self.model;
        let nodes: Vec<usize> = unassigned.clone();
        if nodes.is_empty() {
            return;
        }
        let depot = 0;
        let max_capacity = model.vehicles.iter().map(|v| v.capacity).max().unwrap_or(0);
        let max_stops = model.vehicles.iter().map(|v| v.max_stops).max().unwrap_or(0);

        // s(i, j) = d(0, i) + d(0, j) - d(i, j), merged best-first.
        let mut savings: Vec<(i64, usize, usize)> = Vec::new();
        for (a, &i) in nodes.iter().enumerate() {
            for &j in nodes.iter().skip(a + 1) {
                let s = model.distance_m(depot, i) + model.distance_m(depot, j)
                    - model.distance_m(i, j);
                if s > 0 {
                    savings.push((s, i, j));
                }
            }
        }
        savings.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut sequence_of: std::collections::HashMap<usize, usize> = nodes
            .iter()
            .enumerate()
            .map(|(idx, &node)| (node, idx))
            .collect();
        let mut sequences: Vec<Vec<usize>> = nodes.iter().map(|&n| vec![n]).collect();
        let mut loads: Vec<i64> = nodes.iter().map(|&n| model.nodes[n].demand).collect();

        for (_, i, j) in savings {
            let si = sequence_of[&i];
            let sj = sequence_of[&j];
            if si == sj {
                continue;
            }
            if loads[si] + loads[sj] > max_capacity {
                continue;
            }
            if (sequences[si].len() + sequences[sj].len()) as i64 > max_stops {
                continue;
            }
            // Only end-to-start joins keep both partial paths intact.
            let i_last = *sequences[si].last().unwrap() == i;
            let j_first = *sequences[sj].first().unwrap() == j;
            let i_first = *sequences[si].first().unwrap() == i;
            let j_last = *sequences[sj].last().unwrap() == j;
            let (from, into) = if i_last && j_first {
                (sj, si)
            } else if j_last && i_first {
                (si, sj)
            } else {
                continue;
            };
            let moved = std::mem::take(&mut sequences[from]);
            for &node in &moved {
                sequence_of.insert(node, into);
            }
            sequences[into].extend(moved);
            loads[into] += loads[from];
            loads[from] = 0;
        }

        // Hand the merged sequences to real vehicles, heaviest first.
        let mut merged: Vec<Vec<usize>> = sequences.into_iter().filter(|s| !s.is_empty()).collect();
        merged.sort_by_key(|seq| {
            std::cmp::Reverse(seq.iter().map(|&n| model.nodes[n].demand).sum::<i64>())
        });
        let mut leftovers: Vec<usize> = Vec::new();
        for mut sequence in merged {
            while !sequence.is_empty() {
                if let Some(vehicle) = (0..self.routes.len()).find(|&v| {
                    self.routes[v].is_empty() && model.route_feasible(v, &sequence)
                }) {
                    self.routes[vehicle] = sequence.clone();
                    self.dims[vehicle] = model.route_dims(vehicle, &self.routes[vehicle]);
                    break;
                }
                // Shrink until some vehicle can take it.
                leftovers.push(sequence.pop().unwrap());
            }
        }
        for &node in &leftovers {
            // Re-insert peeled customers wherever they fit best.
            let _ = self.insert_at_best(node);
        }

        let assigned: std::collections::HashSet<usize> =
            self.routes.iter().flatten().copied().collect();
        unassigned.retain(|n| !assigned.contains(n));
    }

    /// Sweep: serve customers in polar-angle order around the main depot,
    /// advancing to the next vehicle when the current one is full.
    fn sweep(&mut self, unassigned: &mut Vec<usize>) {
        let depot_coords = self.model.nodes[0].coordinates;
        let mut ordered: Vec<usize> = unassigned.clone();
        ordered.sort_by(|&a, &b| {
            let angle = |n: usize| {
                let (lat, lon) = self.model.nodes[n].coordinates;
                (lon - depot_coords.1).atan2(lat - depot_coords.0)
            };
            angle(a)
                .partial_cmp(&angle(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut vehicle = 0;
        for node in ordered {
            while vehicle < self.routes.len() {
                let mut placed = false;
                for position in 0..=self.routes[vehicle].len() {
                    if let Some(delta) = self.evaluate_insertion(vehicle, position, node) {
                        self.apply(
                            Insertion {
                                vehicle,
                                position,
                                delta,
                            },
                            node,
                        );
                        placed = true;
                        break;
                    }
                }
                if placed {
                    unassigned.retain(|&n| n != node);
                    break;
                }
                vehicle += 1;
            }
            if vehicle >= self.routes.len() {
                break;
            }
        }
    }
}
