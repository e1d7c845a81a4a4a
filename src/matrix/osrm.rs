//! OSRM HTTP client for the `table` and `route` endpoints.
//!
//! All functions report failures as strings so the service layer can demote
//! the failing sub-request to the next tier.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, trace, warn};

const MAX_URL_LEN: usize = 8_000;
const PUBLIC_HOST: &str = "router.project-osrm.org";
const USER_AGENT: &str = concat!("lastmile-cvrp/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    distances: Option<Vec<Vec<Option<f64>>>>,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<RouteLeg>,
}

#[derive(Debug, Deserialize)]
struct RouteLeg {
    distance: f64,
    duration: f64,
}

/// A table-endpoint result; `None` cells mean OSRM found no road connection.
pub type TableCells = Vec<Vec<Option<f64>>>;

/// Format coordinates the way OSRM wants them: `lon,lat` pairs joined by `;`.
fn coord_path(locations: &[(f64, f64)]) -> String {
    locations
        .iter()
        .map(|(lat, lon)| format!("{},{}", lon, lat))
        .collect::<Vec<_>>()
        .join(";")
}

fn index_list(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn apply_user_agent(builder: reqwest::RequestBuilder, base_url: &str) -> reqwest::RequestBuilder {
    if base_url.contains(PUBLIC_HOST) {
        builder.header("User-Agent", USER_AGENT)
    } else {
        builder
    }
}

/// Fetch a (sub-)matrix from the table endpoint.
///
/// With `sources`/`destinations` unset the whole N×N table is requested;
/// otherwise the tile they describe, with indices into `locations`.
pub async fn fetch_table(
    client: &Client,
    base_url: &str,
    profile: &str,
    timeout: Duration,
    locations: &[(f64, f64)],
    sources: Option<&[usize]>,
    destinations: Option<&[usize]>,
) -> Result<(TableCells, TableCells), String> {
    let mut url = format!(
        "{}/table/v1/{}/{}?annotations=duration,distance",
        base_url.trim_end_matches('/'),
        profile,
        coord_path(locations)
    );
    if let Some(sources) = sources {
        url.push_str(&format!("&sources={}", index_list(sources)));
    }
    if let Some(destinations) = destinations {
        url.push_str(&format!("&destinations={}", index_list(destinations)));
    }
    if url.len() > MAX_URL_LEN {
        warn!(
            "OSRM table URL too long ({} chars, {} locations)",
            url.len(),
            locations.len()
        );
        return Err("table URL exceeds the server limit".to_string());
    }
    trace!("OSRM table request: {url}");

    let response = apply_user_agent(client.get(&url), base_url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| format!("table request failed: {e}"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("table returned HTTP {status}"));
    }
    let body: TableResponse = response
        .json()
        .await
        .map_err(|e| format!("table response was not valid JSON: {e}"))?;
    if body.code != "Ok" {
        return Err(format!(
            "table returned code {} ({})",
            body.code,
            body.message.unwrap_or_default()
        ));
    }
    let distances = body
        .distances
        .ok_or_else(|| "table response missing distances".to_string())?;
    let durations = body
        .durations
        .ok_or_else(|| "table response missing durations".to_string())?;
    debug!(
        "OSRM table ok: {}x{} cells from {}",
        distances.len(),
        distances.first().map_or(0, |r| r.len()),
        base_url
    );
    Ok((distances, durations))
}

/// Fetch one driving route; returns (distance meters, duration seconds).
pub async fn fetch_route(
    client: &Client,
    base_url: &str,
    profile: &str,
    timeout: Duration,
    from: (f64, f64),
    to: (f64, f64),
) -> Result<(f64, f64), String> {
    let url = format!(
        "{}/route/v1/{}/{}?overview=false",
        base_url.trim_end_matches('/'),
        profile,
        coord_path(&[from, to])
    );
    trace!("OSRM route request: {url}");

    let response = apply_user_agent(client.get(&url), base_url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| format!("route request failed: {e}"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("route returned HTTP {status}"));
    }
    let body: RouteResponse = response
        .json()
        .await
        .map_err(|e| format!("route response was not valid JSON: {e}"))?;
    if body.code != "Ok" {
        return Err(format!("route returned code {}", body.code));
    }
    let leg = body
        .routes
        .first()
        .ok_or_else(|| "route response contained no routes".to_string())?;
    Ok((leg.distance, leg.duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_lon_lat_semicolon_separated() {
        let path = coord_path(&[(42.70, 23.32), (42.71, 23.33)]);
        assert_eq!(path, "23.32,42.7;23.33,42.71");
    }

    #[test]
    fn index_lists_join_with_semicolons() {
        assert_eq!(index_list(&[0, 2, 5]), "0;2;5");
    }

    #[test]
    fn table_response_parses_ok_payload() {
        let raw = r#"{"code":"Ok","distances":[[0.0,120.5],[118.2,0.0]],"durations":[[0.0,14.0],[13.5,0.0]]}"#;
        let parsed: TableResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.code, "Ok");
        assert_eq!(parsed.distances.unwrap()[0][1], Some(120.5));
    }

    #[test]
    fn table_response_keeps_unreachable_cells() {
        let raw = r#"{"code":"Ok","distances":[[0.0,null]],"durations":[[0.0,null]]}"#;
        let parsed: TableResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.distances.unwrap()[0][1], None);
    }
}
