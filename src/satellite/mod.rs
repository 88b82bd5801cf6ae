//! Satellite tracking: TLE catalog, SGP4 ground positions, and the
//! geo-indexed position store behind the nearby query.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub mod catalog;
pub mod propagate;
pub mod store;

pub use catalog::{max_age_from_days, refresh_if_stale, LiveCatalog, TleCatalog, TleEntry};
pub use propagate::Geodetic;
pub use store::{InMemorySatelliteStore, SatelliteStore, SqliteSatelliteStore};

/// Mean Earth radius (IUGG), metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A point on the ground. The JSON form is `[lon, lat]`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(from = "[f64; 2]")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl From<[f64; 2]> for GeoPoint {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(anyhow!("latitude {} out of range", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(anyhow!("longitude {} out of range", self.longitude));
        }
        Ok(())
    }
}

/// Latest known position of one satellite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatellitePosition {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "Altitude")]
    pub altitude_km: f64,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

impl SatellitePosition {
    pub fn from_geodetic(name: &str, g: Geodetic, at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            latitude: g.latitude_deg,
            longitude: g.longitude_deg,
            altitude_km: g.altitude_km,
            timestamp: format_timestamp(at),
        }
    }

    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.longitude, self.latitude)
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Great-circle distance in metres.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateSummary {
    pub propagated: usize,
    pub skipped: usize,
}

/// Propagate the whole catalog to `at` and upsert every finite position.
pub fn update_satellites(
    catalog: &TleCatalog,
    store: &mut dyn SatelliteStore,
    at: DateTime<Utc>,
) -> Result<UpdateSummary> {
    let started = Instant::now();
    let mut positions = Vec::with_capacity(catalog.len());
    let mut skipped = 0usize;
    for entry in catalog.iter() {
        match entry.position_at(at) {
            Ok(g) if g.is_finite() => {
                positions.push(SatellitePosition::from_geodetic(&entry.name, g, at))
            }
            Ok(_) => {
                log::debug!("non-finite position for {}", entry.name);
                skipped += 1;
            }
            Err(err) => {
                log::debug!("{:#}", err);
                skipped += 1;
            }
        }
    }
    store.upsert_positions(&positions)?;
    log::info!(
        "updated {} satellite positions ({} skipped) in {:.2?}",
        positions.len(),
        skipped,
        started.elapsed()
    );
    Ok(UpdateSummary {
        propagated: positions.len(),
        skipped,
    })
}

/// Stored satellites within `max_distance_km` of `point`, each re-propagated
/// to `at`. Order follows the stored positions, nearest first.
pub fn nearby_satellites(
    store: &mut dyn SatelliteStore,
    catalog: &TleCatalog,
    point: GeoPoint,
    max_distance_km: f64,
    at: DateTime<Utc>,
) -> Result<Vec<SatellitePosition>> {
    if !max_distance_km.is_finite() || max_distance_km < 0.0 {
        return Err(anyhow!("max_distance_km must be a non-negative number"));
    }
    point.validate()?;

    let hits = store.near(point, max_distance_km * 1000.0)?;
    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(entry) = catalog.get(&hit.name) else {
            log::warn!("satellite {} not found in TLE catalog", hit.name);
            continue;
        };
        match entry.position_at(at) {
            Ok(g) if g.is_finite() => out.push(SatellitePosition::from_geodetic(&hit.name, g, at)),
            Ok(_) => log::warn!("non-finite position for {}", hit.name),
            Err(err) => log::warn!("{:#}", err),
        }
    }
    Ok(out)
}
