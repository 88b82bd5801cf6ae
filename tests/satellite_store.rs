use anyhow::Result;
use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use lookup_api::satellite::{self, GeoPoint, SatellitePosition, SatelliteStore, TleCatalog};
use lookup_api::{shared_memory_uri, SqliteSatelliteStore};

const ISS_TLE: &str = "ISS (ZARYA)
1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992
2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008
";

fn position(name: &str, lon: f64, lat: f64) -> SatellitePosition {
    SatellitePosition {
        name: name.to_string(),
        latitude: lat,
        longitude: lon,
        altitude_km: 550.0,
        timestamp: "2024-03-01T00:00:00Z".to_string(),
    }
}

#[test]
fn positions_persist_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("lookup.db");
    let db_path = db_path.to_string_lossy().to_string();

    {
        let mut store = SqliteSatelliteStore::open(&db_path)?;
        store.upsert_positions(&[position("A", 2.35, 48.85), position("B", 13.40, 52.52)])?;
    }

    let mut store = SqliteSatelliteStore::open(&db_path)?;
    assert_eq!(store.count()?, 2);
    let paris = GeoPoint::new(2.35, 48.85);
    let hits = store.near(paris, 1_000_000.0)?;
    let names: Vec<&str> = hits.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    Ok(())
}

#[test]
fn shared_memory_databases_are_shared_and_isolated() -> Result<()> {
    let uri = shared_memory_uri();
    let mut writer = SqliteSatelliteStore::open(&uri)?;
    let mut reader = SqliteSatelliteStore::open(&uri)?;
    writer.upsert_positions(&[position("SHARED", 0.0, 0.0)])?;
    assert_eq!(reader.count()?, 1);

    let mut other = SqliteSatelliteStore::open(&shared_memory_uri())?;
    assert_eq!(other.count()?, 0);
    Ok(())
}

#[test]
fn update_replaces_previous_positions() -> Result<()> {
    let mut store = SqliteSatelliteStore::open(&shared_memory_uri())?;
    let catalog = TleCatalog::parse(ISS_TLE);
    let first = Utc.with_ymd_and_hms(2020, 7, 12, 21, 20, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2020, 7, 12, 21, 50, 0).unwrap();

    satellite::update_satellites(&catalog, &mut store, first)?;
    let summary = satellite::update_satellites(&catalog, &mut store, second)?;
    assert_eq!(summary.propagated, 1);
    assert_eq!(store.count()?, 1);

    let everything = store.near(GeoPoint::new(0.0, 0.0), 2.1e7)?;
    assert_eq!(everything.len(), 1);
    assert_eq!(everything[0].name, "ISS (ZARYA)");
    assert_eq!(everything[0].timestamp, "2020-07-12T21:50:00Z");
    Ok(())
}

#[test]
fn results_are_sorted_and_bounded_by_distance() -> Result<()> {
    let mut store = SqliteSatelliteStore::open(&shared_memory_uri())?;
    store.upsert_positions(&[
        position("FAR", 0.0, 5.0),
        position("MID", 0.0, 2.0),
        position("NEAR", 0.5, 0.0),
        position("OUTSIDE", 0.0, 20.0),
        position("HIGH_LAT", 0.0, 85.0),
    ])?;

    let hits = store.near(GeoPoint::new(0.0, 0.0), 600_000.0)?;
    let names: Vec<&str> = hits.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["NEAR", "MID", "FAR"]);

    let hits = store.near(GeoPoint::new(120.0, 89.0), 700_000.0)?;
    let names: Vec<&str> = hits.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["HIGH_LAT"]);
    Ok(())
}
