//! Distance-matrix service: chunked OSRM retrieval with persistent caching
//! and great-circle fallback.

pub mod cache;
pub mod osrm;

use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, MatrixConfig};
use crate::error::{Error, Result};
use crate::geo;
use cache::MatrixCache;

/// Pairwise driving distances (meters) and durations (seconds).
///
/// Locations are ordered depots-first and indices stay stable for the
/// lifetime of a solve; the structure is never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceMatrix {
    pub locations: Vec<(f64, f64)>,
    pub distances: Vec<Vec<f64>>,
    pub durations: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn distance_m(&self, from: usize, to: usize) -> f64 {
        self.distances[from][to]
    }

    pub fn duration_s(&self, from: usize, to: usize) -> f64 {
        self.durations[from][to]
    }
}

pub struct MatrixService {
    config: MatrixConfig,
    cache: MatrixCache,
    client: Client,
}

impl MatrixService {
    pub fn new(matrix: MatrixConfig, cache: CacheConfig) -> Self {
        let service = Self {
            cache: MatrixCache::new(&cache),
            client: Client::new(),
            config: matrix,
        };
        service.cache.sweep();
        service
    }

    pub fn cache(&self) -> &MatrixCache {
        &self.cache
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn endpoints(&self) -> Vec<&str> {
        self.config
            .primary_endpoint
            .iter()
            .chain(self.config.fallback_endpoint.iter())
            .map(|s| s.as_str())
            .collect()
    }

    /// Great-circle approximation for one pair, inflated to mimic the road
    /// network, with duration from the assumed average speed.
    fn approx_pair(&self, from: (f64, f64), to: (f64, f64)) -> (f64, f64) {
        let distance = geo::haversine_m(from, to) * self.config.haversine_inflation;
        let duration = distance / (self.config.haversine_speed_kmh / 3.6);
        (distance, duration)
    }

    /// Obtain the full matrix for `locations`, consulting the cache first.
    pub async fn matrix(&self, locations: &[(f64, f64)]) -> Result<DistanceMatrix> {
        let n = locations.len();
        if n == 0 {
            return Err(Error::InvalidInput(
                "cannot build a matrix over zero locations".to_string(),
            ));
        }
        if let Some(hit) = self.cache.load(locations, &self.config.profile) {
            info!("distance matrix served from cache ({n} locations)");
            return Ok(hit);
        }

        let matrix = if n <= self.config.table_limit {
            self.full_table(locations).await
        } else if n <= self.config.pairwise_threshold {
            self.tiled_table(locations).await
        } else {
            self.pairwise(locations).await
        };

        for row in &matrix.distances {
            if row.iter().any(|v| !v.is_finite()) {
                return Err(Error::MatrixUnavailable(
                    "matrix contains non-finite distances after all tiers".to_string(),
                ));
            }
        }

        self.cache.store(&matrix, &self.config.profile);
        Ok(matrix)
    }

    /// Fetch and cache the matrix ahead of a solve.
    pub async fn prewarm(&self, locations: &[(f64, f64)]) -> Result<()> {
        self.matrix(locations).await.map(|_| ())
    }

    /// Single table call covering all locations (N within the server limit).
    async fn full_table(&self, locations: &[(f64, f64)]) -> DistanceMatrix {
        let all: Vec<usize> = (0..locations.len()).collect();
        let (distances, durations) = self.fetch_tile(locations, &all, &all, true).await;
        DistanceMatrix {
            locations: locations.to_vec(),
            distances,
            durations,
        }
    }

    /// Tile the N×N matrix into chunk_size-edged sub-requests and stitch.
    async fn tiled_table(&self, locations: &[(f64, f64)]) -> DistanceMatrix {
        let n = locations.len();
        let indices: Vec<usize> = (0..n).collect();
        let blocks: Vec<&[usize]> = indices.chunks(self.config.chunk_size).collect();
        debug!(
            "tiling {n}x{n} matrix into {} sub-requests",
            blocks.len() * blocks.len()
        );

        let tiles: Vec<(usize, usize, (Vec<Vec<f64>>, Vec<Vec<f64>>))> =
            stream::iter(blocks.iter().enumerate().flat_map(|(bi, rows)| {
                blocks.iter().enumerate().map(move |(bj, cols)| (bi, rows, bj, cols))
            }))
            .map(|(bi, rows, bj, cols)| async move {
                (bi, bj, self.fetch_tile(locations, rows, cols, false).await)
            })
            .buffer_unordered(self.config.max_concurrent_requests)
            .collect()
            .await;

        let mut distances = vec![vec![0.0; n]; n];
        let mut durations = vec![vec![0.0; n]; n];
        let chunk = self.config.chunk_size;
        for (bi, bj, (tile_d, tile_t)) in tiles {
            for (r, global_r) in (bi * chunk..).take(tile_d.len()).enumerate() {
                for (c, global_c) in (bj * chunk..).take(tile_d[r].len()).enumerate() {
                    distances[global_r][global_c] = tile_d[r][c];
                    durations[global_r][global_c] = tile_t[r][c];
                }
            }
        }
        for i in 0..n {
            distances[i][i] = 0.0;
            durations[i][i] = 0.0;
        }
        DistanceMatrix {
            locations: locations.to_vec(),
            distances,
            durations,
        }
    }

    /// For very large N, query individual routes with bounded concurrency;
    /// symmetric pairs are fetched once and mirrored.
    async fn pairwise(&self, locations: &[(f64, f64)]) -> DistanceMatrix {
        let n = locations.len();
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        info!(
            "matrix over {n} locations exceeds the table threshold; issuing {} pairwise queries",
            pairs.len()
        );

        let results: Vec<(usize, usize, (f64, f64))> = stream::iter(pairs.into_iter().map(
            |(i, j)| {
                let from = locations[i];
                let to = locations[j];
                async move { (i, j, self.fetch_pair(from, to).await) }
            },
        ))
        .buffer_unordered(self.config.max_concurrent_requests)
        .collect()
        .await;

        let mut distances = vec![vec![0.0; n]; n];
        let mut durations = vec![vec![0.0; n]; n];
        for (i, j, (d, t)) in results {
            distances[i][j] = d;
            distances[j][i] = d;
            durations[i][j] = t;
            durations[j][i] = t;
        }
        DistanceMatrix {
            locations: locations.to_vec(),
            distances,
            durations,
        }
    }

    /// One tile through the fallback tiers: configured server, then the
    /// public server, then the great-circle approximation. Demotion happens
    /// here, per sub-request, so partial OSRM success is preserved.
    async fn fetch_tile(
        &self,
        locations: &[(f64, f64)],
        rows: &[usize],
        cols: &[usize],
        full: bool,
    ) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        // Each sub-request carries only the coordinates it needs, with
        // explicit source/destination indices into that shortened list.
        let mut sub: Vec<usize> = rows.iter().chain(cols.iter()).copied().collect();
        sub.sort_unstable();
        sub.dedup();
        let coords: Vec<(f64, f64)> = sub.iter().map(|&i| locations[i]).collect();
        let src_pos: Vec<usize> = rows
            .iter()
            .map(|r| sub.binary_search(r).expect("row index in sub-list"))
            .collect();
        let dst_pos: Vec<usize> = cols
            .iter()
            .map(|c| sub.binary_search(c).expect("col index in sub-list"))
            .collect();

        for endpoint in self.endpoints() {
            let fetched = osrm::fetch_table(
                &self.client,
                endpoint,
                &self.config.profile,
                self.timeout(),
                &coords,
                (!full).then_some(src_pos.as_slice()),
                (!full).then_some(dst_pos.as_slice()),
            )
            .await;
            match fetched {
                Ok((cells_d, cells_t)) if cells_d.len() == rows.len() => {
                    return self.fill_unreachable(locations, rows, cols, cells_d, cells_t);
                }
                Ok(_) => {
                    warn!("OSRM tile from {endpoint} had the wrong shape, demoting");
                }
                Err(reason) => {
                    warn!("OSRM tile from {endpoint} failed ({reason}), demoting");
                }
            }
        }

        debug!(
            "tile {}x{} served by great-circle approximation",
            rows.len(),
            cols.len()
        );
        let mut distances = vec![vec![0.0; cols.len()]; rows.len()];
        let mut durations = vec![vec![0.0; cols.len()]; rows.len()];
        for (r, &i) in rows.iter().enumerate() {
            for (c, &j) in cols.iter().enumerate() {
                if i != j {
                    let (d, t) = self.approx_pair(locations[i], locations[j]);
                    distances[r][c] = d;
                    durations[r][c] = t;
                }
            }
        }
        (distances, durations)
    }

    /// Replace cells OSRM marked unreachable (null) with the approximation.
    fn fill_unreachable(
        &self,
        locations: &[(f64, f64)],
        rows: &[usize],
        cols: &[usize],
        cells_d: osrm::TableCells,
        cells_t: osrm::TableCells,
    ) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let mut distances = vec![vec![0.0; cols.len()]; rows.len()];
        let mut durations = vec![vec![0.0; cols.len()]; rows.len()];
        for (r, &i) in rows.iter().enumerate() {
            for (c, &j) in cols.iter().enumerate() {
                match (
                    cells_d.get(r).and_then(|row| row.get(c)).copied().flatten(),
                    cells_t.get(r).and_then(|row| row.get(c)).copied().flatten(),
                ) {
                    (Some(d), Some(t)) => {
                        distances[r][c] = d;
                        durations[r][c] = t;
                    }
                    _ if i == j => {}
                    _ => {
                        let (d, t) = self.approx_pair(locations[i], locations[j]);
                        distances[r][c] = d;
                        durations[r][c] = t;
                    }
                }
            }
        }
        (distances, durations)
    }

    /// One pair through the tiers, for the pairwise strategy.
    async fn fetch_pair(&self, from: (f64, f64), to: (f64, f64)) -> (f64, f64) {
        for endpoint in self.endpoints() {
            match osrm::fetch_route(
                &self.client,
                endpoint,
                &self.config.profile,
                self.timeout(),
                from,
                to,
            )
            .await
            {
                Ok(pair) => return pair,
                Err(reason) => {
                    warn!("OSRM route from {endpoint} failed ({reason}), demoting");
                }
            }
        }
        self.approx_pair(from, to)
    }
}
