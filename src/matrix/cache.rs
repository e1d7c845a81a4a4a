//! Persistent matrix cache: one JSON file per coordinate fingerprint.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::matrix::DistanceMatrix;

/// Participates in every fingerprint; bump when the wire quantization or the
/// entry layout changes so stale files stop matching.
pub const MATRIX_VERSION: &str = "2";

/// Fixed-point quantization used so fingerprints tolerate float noise.
fn quantize(coords: (f64, f64)) -> (i64, i64) {
    (
        (coords.0 * 1e5).round() as i64,
        (coords.1 * 1e5).round() as i64,
    )
}

/// Order-independent fingerprint for a full (symmetric) table request.
pub fn fingerprint(locations: &[(f64, f64)], profile: &str) -> String {
    let mut quantized: Vec<(i64, i64)> = locations.iter().copied().map(quantize).collect();
    quantized.sort_unstable();
    let mut hasher = DefaultHasher::new();
    MATRIX_VERSION.hash(&mut hasher);
    profile.hash(&mut hasher);
    quantized.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Fingerprint for an asymmetric request; sources and destinations are
/// hashed separately so swapping them yields a different key.
pub fn fingerprint_asymmetric(
    sources: &[(f64, f64)],
    destinations: &[(f64, f64)],
    profile: &str,
) -> String {
    let mut src: Vec<(i64, i64)> = sources.iter().copied().map(quantize).collect();
    let mut dst: Vec<(i64, i64)> = destinations.iter().copied().map(quantize).collect();
    src.sort_unstable();
    dst.sort_unstable();
    let mut hasher = DefaultHasher::new();
    MATRIX_VERSION.hash(&mut hasher);
    profile.hash(&mut hasher);
    src.hash(&mut hasher);
    "->".hash(&mut hasher);
    dst.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    created_at: DateTime<Utc>,
    profile: String,
    locations: Vec<(f64, f64)>,
    distances: Vec<Vec<i64>>,
    durations: Vec<Vec<i64>>,
}

#[derive(Debug, Clone)]
pub struct MatrixCache {
    directory: PathBuf,
    ttl_seconds: u64,
    enabled: bool,
}

impl MatrixCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            ttl_seconds: config.ttl_seconds,
            enabled: config.enabled,
        }
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.directory.join(format!("matrix-{fingerprint}.json"))
    }

    fn is_expired(&self, created_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(created_at);
        age.num_seconds() < 0 || age.num_seconds() as u64 > self.ttl_seconds
    }

    /// Look up a matrix for exactly this location list.
    ///
    /// The fingerprint is order-independent, so a hit may have been stored
    /// under a different ordering; rows and columns are remapped to the
    /// requested order before returning.
    pub fn load(&self, locations: &[(f64, f64)], profile: &str) -> Option<DistanceMatrix> {
        if !self.enabled {
            return None;
        }
        let path = self.path_for(&fingerprint(locations, profile));
        let raw = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("discarding unreadable cache file {}: {e}", path.display());
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if entry.profile != profile || entry.locations.len() != locations.len() {
            return None;
        }
        if self.is_expired(entry.created_at) {
            debug!("cache entry expired: {}", path.display());
            let _ = fs::remove_file(&path);
            return None;
        }

        // Map each requested location to its stored index.
        let stored: Vec<(i64, i64)> = entry.locations.iter().copied().map(quantize).collect();
        let mut remap = Vec::with_capacity(locations.len());
        for loc in locations {
            let q = quantize(*loc);
            let idx = stored.iter().position(|s| *s == q)?;
            remap.push(idx);
        }

        let n = locations.len();
        let mut distances = vec![vec![0.0; n]; n];
        let mut durations = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                distances[i][j] = entry.distances[remap[i]][remap[j]] as f64;
                durations[i][j] = entry.durations[remap[i]][remap[j]] as f64;
            }
        }
        debug!("cache hit for {} locations", n);
        Some(DistanceMatrix {
            locations: locations.to_vec(),
            distances,
            durations,
        })
    }

    /// Persist a matrix; values are quantized to whole meters/seconds.
    pub fn store(&self, matrix: &DistanceMatrix, profile: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = fs::create_dir_all(&self.directory) {
            warn!("cannot create cache directory: {e}");
            return;
        }
        let entry = CacheEntry {
            created_at: Utc::now(),
            profile: profile.to_string(),
            locations: matrix.locations.clone(),
            distances: matrix
                .distances
                .iter()
                .map(|row| row.iter().map(|v| v.round() as i64).collect())
                .collect(),
            durations: matrix
                .durations
                .iter()
                .map(|row| row.iter().map(|v| v.round() as i64).collect())
                .collect(),
        };
        let path = self.path_for(&fingerprint(&matrix.locations, profile));
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = fs::write(&path, raw) {
                    warn!("cache write failed for {}: {e}", path.display());
                }
            }
            Err(e) => warn!("cache serialization failed: {e}"),
        }
    }

    /// Remove expired entries; returns how many files were deleted.
    pub fn sweep(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return 0;
        };
        let mut removed = 0;
        for file in entries.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
                .is_none_or(|entry| self.is_expired(entry.created_at));
            if expired && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("cache sweep removed {removed} expired entries");
        }
        removed
    }

    /// (entry count, total bytes) for diagnostics.
    pub fn info(&self) -> (usize, u64) {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return (0, 0);
        };
        let mut count = 0;
        let mut bytes = 0;
        for file in entries.flatten() {
            if file.path().extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
                bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        (count, bytes)
    }
}
