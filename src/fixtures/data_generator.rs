//! Customer ingestion from CSV plus a seeded synthetic-instance generator
//! for tests and benchmarks.

use std::collections::HashSet;
use std::path::Path;

use csv::ReaderBuilder;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::domain::types::Customer;
use crate::error::{Error, Result};

/// Reads customers from a CSV with columns `id,name,lat,lon,volume`.
///
/// Supports files with or without a header row. Rows whose coordinates do
/// not parse keep the raw text and flow to the overflow later; a row with a
/// non-numeric volume aborts the run.
pub fn load_customers_from_csv(csv_path: impl AsRef<Path>) -> Result<Vec<Customer>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(csv_path.as_ref())
        .map_err(|e| {
            Error::InvalidInput(format!("cannot read {}: {e}", csv_path.as_ref().display()))
        })?;

    let mut customers = Vec::new();
    let mut seen = HashSet::new();

    for (idx, row) in reader.records().enumerate() {
        let record = row.map_err(|e| Error::InvalidInput(format!("csv row {idx}: {e}")))?;
        if record.is_empty() {
            continue;
        }
        let field = |i: usize| record.get(i).unwrap_or("").to_string();
        let id = field(0);
        if id.is_empty() {
            continue;
        }

        let raw_volume = field(4);
        // Treat the first row as a header when its volume cell is not a
        // number.
        if idx == 0 && raw_volume.parse::<f64>().is_err() {
            continue;
        }

        if !seen.insert(id.clone()) {
            warn!("skipping duplicate customer id {id}");
            continue;
        }

        let volume: f64 = raw_volume.parse().map_err(|_| {
            Error::InvalidInput(format!(
                "customer {id} has a non-numeric volume: '{raw_volume}'"
            ))
        })?;
        if volume < 0.0 {
            return Err(Error::InvalidInput(format!(
                "customer {id} has a negative volume"
            )));
        }

        let raw_gps = format!("{}, {}", field(2), field(3));
        let coordinates = match (field(2).parse::<f64>(), field(3).parse::<f64>()) {
            (Ok(lat), Ok(lon)) => Some((lat, lon)),
            _ => {
                warn!("customer {id} has unparsable coordinates: '{raw_gps}'");
                None
            }
        };

        customers.push(Customer::new(id, field(1), coordinates, volume, raw_gps));
    }

    if customers.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} contained no customer rows",
            csv_path.as_ref().display()
        )));
    }
    info!(
        "loaded {} customers from {}",
        customers.len(),
        csv_path.as_ref().display()
    );
    Ok(customers)
}

/// Deterministic synthetic instance scattered around an origin point.
pub fn generate_random_customers(count: usize, seed: u64, origin: (f64, f64)) -> Vec<Customer> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let lat = origin.0 + rng.gen_range(-0.15..0.15);
            let lon = origin.1 + rng.gen_range(-0.15..0.15);
            let volume = rng.gen_range(1..=40) as f64;
            Customer::new(
                format!("gen-{i}"),
                format!("Generated {i}"),
                Some((lat, lon)),
                volume,
                format!("{lat}, {lon}"),
            )
        })
        .collect()
}
