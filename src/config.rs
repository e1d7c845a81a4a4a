//! Configuration surface for the routing engine.
//!
//! Everything is serde-deserializable so a run can be driven from a JSON
//! file; the `Default` impls carry the stock fleet and tuning values.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::types::VehicleClass;
use crate::error::{Error, Result};
use crate::geo::{self, CenterZone};

/// One fleet entry: a class of identical vehicles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub class: VehicleClass,
    /// Capacity in stack units.
    pub capacity: u32,
    /// How many identical vehicles of this class exist.
    pub count: u32,
    pub max_distance_km: Option<f64>,
    /// Maximum working time in minutes.
    pub max_time_minutes: u32,
    /// Service time per stop in minutes.
    pub service_time_minutes: u32,
    pub enabled: bool,
    /// Operational depot; `None` means the main depot.
    pub start_location: Option<(f64, f64)>,
    pub max_customers_per_route: Option<u32>,
    /// Route start time in minutes after midnight.
    pub start_time_minutes: u32,
    /// Depot used for per-route TSP post-optimization; defaults to
    /// `start_location`.
    pub tsp_depot_location: Option<(f64, f64)>,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            class: VehicleClass::new("INTERNAL"),
            capacity: 360,
            count: 1,
            max_distance_km: None,
            max_time_minutes: 1_200,
            service_time_minutes: 10,
            enabled: true,
            start_location: None,
            max_customers_per_route: None,
            start_time_minutes: 0,
            tsp_depot_location: None,
        }
    }
}

impl VehicleConfig {
    /// The depot the TSP reoptimizer should use, if any is configured.
    pub fn tsp_depot(&self) -> Option<(f64, f64)> {
        self.tsp_depot_location.or(self.start_location)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterZoneConfig {
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_km: f64,
    /// The class that gets the in-zone discount.
    pub center_class: VehicleClass,
    /// Multiplier on the base arc cost for the center class (0.10 = 90% rebate).
    pub discount_for_center_class: f64,
    /// Flat cost added to in-zone arcs for every other class.
    pub penalty_for_others: i64,
    /// Also shape arcs leaving the zone, not only arcs arriving in it.
    pub symmetric: bool,
}

impl Default for CenterZoneConfig {
    fn default() -> Self {
        Self {
            center_lat: 42.69773576871825,
            center_lon: 23.321588606946342,
            radius_km: 1.8,
            center_class: VehicleClass::new("CENTER"),
            discount_for_center_class: 0.10,
            penalty_for_others: 40_000,
            symmetric: false,
        }
    }
}

impl CenterZoneConfig {
    pub fn zone(&self) -> CenterZone {
        CenterZone::new((self.center_lat, self.center_lon), self.radius_km)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Wall-clock budget per strategy worker, in seconds.
    pub time_limit_seconds: u64,
    /// Number of racing workers; -1 means cores - 1.
    pub parallel_workers: i32,
    pub allow_customer_skipping: bool,
    /// Fixed cost (distance units) for dropping one customer.
    pub skip_penalty: i64,
    pub enable_tsp_reoptimization: bool,
    pub random_seed: u64,
    pub log_search: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_seconds: 360,
            parallel_workers: -1,
            allow_customer_skipping: true,
            skip_penalty: 45_000,
            enable_tsp_reoptimization: true,
            random_seed: 42,
            log_search: false,
        }
    }
}

impl SolverConfig {
    /// Resolved worker count: -1 expands to cores - 1, floor 1.
    pub fn worker_count(&self) -> usize {
        if self.parallel_workers < 0 {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        } else {
            (self.parallel_workers as usize).max(1)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Local OSRM server; `None` disables the tier.
    pub primary_endpoint: Option<String>,
    /// Public OSRM server used as an off-site fallback; `None` disables it.
    pub fallback_endpoint: Option<String>,
    pub profile: String,
    pub timeout_seconds: u64,
    /// Tile edge for chunked table retrieval.
    pub chunk_size: usize,
    /// Largest N served by a single table call.
    pub table_limit: usize,
    /// Above this N the service switches to pairwise route queries.
    pub pairwise_threshold: usize,
    pub max_concurrent_requests: usize,
    /// Road-network inflation applied to great-circle distances.
    pub haversine_inflation: f64,
    /// Assumed average speed for great-circle durations.
    pub haversine_speed_kmh: f64,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            primary_endpoint: Some("http://localhost:5000".to_string()),
            fallback_endpoint: Some("http://router.project-osrm.org".to_string()),
            profile: "driving".to_string(),
            timeout_seconds: 30,
            chunk_size: 80,
            table_limit: 30,
            pairwise_threshold: 500,
            max_concurrent_requests: 10,
            haversine_inflation: 1.3,
            haversine_speed_kmh: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub ttl_seconds: u64,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("cache"),
            ttl_seconds: 24 * 60 * 60,
            enabled: true,
        }
    }
}

/// Pre-solve allocation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Per-customer volume ceiling; larger orders go to the warehouse.
    pub max_customer_volume: f64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            max_customer_volume: 120.0,
        }
    }
}

/// Top-level configuration for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    /// Main depot, always matrix index 0.
    pub depot_location: (f64, f64),
    pub fleet: Vec<VehicleConfig>,
    pub center_zone: CenterZoneConfig,
    pub solver: SolverConfig,
    pub matrix: MatrixConfig,
    pub cache: CacheConfig,
    pub warehouse: WarehouseConfig,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            depot_location: (42.695785029219415, 23.23165887245312),
            fleet: default_fleet(),
            center_zone: CenterZoneConfig::default(),
            solver: SolverConfig::default(),
            matrix: MatrixConfig::default(),
            cache: CacheConfig::default(),
            warehouse: WarehouseConfig::default(),
        }
    }
}

/// Stock fleet: four internal vans, one center van starting downtown and
/// three long-range external vans.
fn default_fleet() -> Vec<VehicleConfig> {
    let zone = CenterZoneConfig::default();
    vec![
        VehicleConfig {
            class: VehicleClass::new("INTERNAL"),
            capacity: 360,
            count: 4,
            max_distance_km: Some(50.0),
            ..VehicleConfig::default()
        },
        VehicleConfig {
            class: VehicleClass::new("CENTER"),
            capacity: 250,
            count: 1,
            max_distance_km: Some(40.0),
            start_location: Some((zone.center_lat, zone.center_lon)),
            ..VehicleConfig::default()
        },
        VehicleConfig {
            class: VehicleClass::new("EXTERNAL"),
            capacity: 360,
            count: 3,
            max_distance_km: Some(200.0),
            ..VehicleConfig::default()
        },
    ]
}

impl MainConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply environment overrides (`OSRM_BASE_URL`, `OSRM_FALLBACK_URL`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("OSRM_BASE_URL") {
            if !url.trim().is_empty() {
                self.matrix.primary_endpoint = Some(url);
            }
        }
        if let Ok(url) = env::var("OSRM_FALLBACK_URL") {
            if !url.trim().is_empty() {
                self.matrix.fallback_endpoint = Some(url);
            }
        }
    }

    /// Only the fleet entries that take part in a solve.
    pub fn enabled_fleet(&self) -> Vec<&VehicleConfig> {
        self.fleet.iter().filter(|v| v.enabled).collect()
    }

    /// Total capacity of the enabled fleet, in stack units.
    pub fn total_fleet_capacity(&self) -> u64 {
        self.enabled_fleet()
            .iter()
            .map(|v| v.capacity as u64 * v.count as u64)
            .sum()
    }

    /// Largest single-vehicle capacity among enabled classes.
    pub fn max_vehicle_capacity(&self) -> u32 {
        self.enabled_fleet()
            .iter()
            .map(|v| v.capacity)
            .max()
            .unwrap_or(0)
    }

    /// Rejects configurations that would make the solve meaningless.
    pub fn validate(&self) -> Result<()> {
        if !geo::in_bounds(self.depot_location) {
            return Err(Error::InvalidInput(format!(
                "main depot coordinates out of bounds: {:?}",
                self.depot_location
            )));
        }
        let enabled = self.enabled_fleet();
        if enabled.is_empty() {
            return Err(Error::InvalidInput(
                "no enabled vehicles in the fleet".to_string(),
            ));
        }
        for vehicle in enabled {
            if vehicle.capacity == 0 {
                return Err(Error::InvalidInput(format!(
                    "vehicle class {} is enabled with capacity 0",
                    vehicle.class
                )));
            }
            if vehicle.count == 0 {
                return Err(Error::InvalidInput(format!(
                    "vehicle class {} is enabled with count 0",
                    vehicle.class
                )));
            }
            if vehicle.max_time_minutes == 0 {
                return Err(Error::InvalidInput(format!(
                    "vehicle class {} has a zero working-time budget",
                    vehicle.class
                )));
            }
            if vehicle.max_customers_per_route == Some(0) {
                return Err(Error::InvalidInput(format!(
                    "vehicle class {} allows 0 customers per route",
                    vehicle.class
                )));
            }
            for depot in [vehicle.start_location, vehicle.tsp_depot_location]
                .into_iter()
                .flatten()
            {
                if !geo::in_bounds(depot) {
                    return Err(Error::InvalidInput(format!(
                        "vehicle class {} references a depot out of bounds: {:?}",
                        vehicle.class, depot
                    )));
                }
            }
        }
        if self.center_zone.radius_km <= 0.0 {
            return Err(Error::InvalidInput(
                "center zone radius must be positive".to_string(),
            ));
        }
        if self.matrix.chunk_size < 2 {
            return Err(Error::Config(
                "matrix chunk_size must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}
