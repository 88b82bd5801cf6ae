use anyhow::Result;
use rusqlite::{params, Connection};

use super::{haversine_m, GeoPoint, SatellitePosition, EARTH_RADIUS_M};

/// Geo-indexed store of the latest known position per satellite.
pub trait SatelliteStore: Send {
    /// Insert or replace positions, keyed by satellite name.
    fn upsert_positions(&mut self, positions: &[SatellitePosition]) -> Result<usize>;

    /// Positions within `max_distance_m` of `point`, nearest first.
    fn near(&mut self, point: GeoPoint, max_distance_m: f64) -> Result<Vec<SatellitePosition>>;

    fn count(&mut self) -> Result<usize>;
}

pub struct SqliteSatelliteStore {
    conn: Connection,
}

impl SqliteSatelliteStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS satellites (
              name TEXT PRIMARY KEY,
              latitude REAL NOT NULL,
              longitude REAL NOT NULL,
              altitude_km REAL NOT NULL,
              timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_satellites_lat_lon ON satellites(latitude, longitude);
            "#,
        )?;
        Ok(())
    }
}

impl SatelliteStore for SqliteSatelliteStore {
    fn upsert_positions(&mut self, positions: &[SatellitePosition]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO satellites(name, latitude, longitude, altitude_km, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(name) DO UPDATE SET
                  latitude = excluded.latitude,
                  longitude = excluded.longitude,
                  altitude_km = excluded.altitude_km,
                  timestamp = excluded.timestamp
                "#,
            )?;
            for pos in positions {
                stmt.execute(params![
                    pos.name,
                    pos.latitude,
                    pos.longitude,
                    pos.altitude_km,
                    pos.timestamp
                ])?;
            }
        }
        tx.commit()?;
        Ok(positions.len())
    }

    fn near(&mut self, point: GeoPoint, max_distance_m: f64) -> Result<Vec<SatellitePosition>> {
        let (min_lat, max_lat, min_lon, max_lon) = bounding_box(point, max_distance_m);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, latitude, longitude, altitude_km, timestamp
            FROM satellites
            WHERE latitude BETWEEN ?1 AND ?2
              AND longitude BETWEEN ?3 AND ?4
            "#,
        )?;
        let rows = stmt.query_map(params![min_lat, max_lat, min_lon, max_lon], |row| {
            Ok(SatellitePosition {
                name: row.get(0)?,
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                altitude_km: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        Ok(nearest_within(candidates, point, max_distance_m))
    }

    fn count(&mut self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM satellites", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySatelliteStore {
    positions: Vec<SatellitePosition>,
}

impl SatelliteStore for InMemorySatelliteStore {
    fn upsert_positions(&mut self, positions: &[SatellitePosition]) -> Result<usize> {
        for pos in positions {
            match self.positions.iter_mut().find(|p| p.name == pos.name) {
                Some(existing) => *existing = pos.clone(),
                None => self.positions.push(pos.clone()),
            }
        }
        Ok(positions.len())
    }

    fn near(&mut self, point: GeoPoint, max_distance_m: f64) -> Result<Vec<SatellitePosition>> {
        Ok(nearest_within(self.positions.clone(), point, max_distance_m))
    }

    fn count(&mut self) -> Result<usize> {
        Ok(self.positions.len())
    }
}

/// Coarse (min_lat, max_lat, min_lon, max_lon) window around `point`. The
/// longitude window opens to the full range near the poles and when it would
/// cross the antimeridian.
fn bounding_box(point: GeoPoint, max_distance_m: f64) -> (f64, f64, f64, f64) {
    let angular = max_distance_m / EARTH_RADIUS_M;
    let band_deg = angular.to_degrees();
    let min_lat = point.latitude - band_deg;
    let max_lat = point.latitude + band_deg;
    let ratio = angular.sin() / point.latitude.to_radians().cos();
    if min_lat <= -90.0 || max_lat >= 90.0 || angular >= std::f64::consts::FRAC_PI_2 || ratio >= 1.0 {
        return (min_lat, max_lat, -180.0, 180.0);
    }
    let lon_band = ratio.asin().to_degrees();
    let min_lon = point.longitude - lon_band;
    let max_lon = point.longitude + lon_band;
    if min_lon < -180.0 || max_lon > 180.0 {
        return (min_lat, max_lat, -180.0, 180.0);
    }
    (min_lat, max_lat, min_lon, max_lon)
}

fn nearest_within(
    candidates: Vec<SatellitePosition>,
    point: GeoPoint,
    max_distance_m: f64,
) -> Vec<SatellitePosition> {
    let mut hits: Vec<(f64, SatellitePosition)> = candidates
        .into_iter()
        .map(|pos| (haversine_m(point, pos.location()), pos))
        .filter(|(distance, _)| *distance <= max_distance_m)
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
    hits.into_iter().map(|(_, pos)| pos).collect()
}
