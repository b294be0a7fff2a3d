#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use geo_types::Point;
use trace_matcher::probability::haversine_distance;
use trace_matcher::{Candidate, Fix, NetworkDistance};

/// Fixes along the equator, `spacing` degrees of longitude and ten seconds apart
pub fn fixes_along_equator(n: usize, spacing: f64) -> Vec<Fix> {
    let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            Fix::new(
                Point::new(i as f64 * spacing, 0.0),
                t0 + Duration::seconds(10 * i as i64),
            )
        })
        .collect()
}

/// Candidate exactly on the fix
pub fn on_fix(fix: &Fix, edge_id: u64) -> Candidate {
    Candidate::new(fix.location, edge_id, 0.0)
}

/// Candidate `north` degrees of latitude away from the fix
pub fn north_of(fix: &Fix, edge_id: u64, north: f64) -> Candidate {
    let location = Point::new(fix.location.x(), fix.location.y() + north);
    Candidate::new(location, edge_id, haversine_distance(fix.location, location))
}

/// Oracle whose network distance always equals the straight-line distance
pub fn straight(from: &Candidate, to: &Candidate) -> anyhow::Result<NetworkDistance> {
    Ok(NetworkDistance::Reachable(haversine_distance(
        from.location,
        to.location,
    )))
}
