//! satellite_update - refresh the TLE cache and upsert current positions

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use lookup_api::satellite::{self, SatelliteStore, SqliteSatelliteStore, TleCatalog};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the satellite position database.
    #[arg(long, env = "LOOKUP_DB_PATH", default_value = "lookup.db")]
    db_path: String,
    /// TLE cache file.
    #[arg(long, env = "LOOKUP_TLE_PATH", default_value = "stations.tle")]
    tle_path: PathBuf,
    /// Catalog download URL.
    #[arg(
        long,
        default_value = "https://celestrak.org/NORAD/elements/gp.php?GROUP=active&FORMAT=tle"
    )]
    tle_url: String,
    /// Re-download when the cache is older than this many days.
    #[arg(long, default_value_t = 7)]
    max_age_days: u64,
    /// Download even when the cache is fresh.
    #[arg(long)]
    force: bool,
    /// Use the cached catalog as-is; never touch the network.
    #[arg(long, conflicts_with = "force")]
    offline: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.offline {
        let max_age = if args.force {
            Duration::ZERO
        } else {
            satellite::max_age_from_days(args.max_age_days)
        };
        let downloaded = satellite::refresh_if_stale(&args.tle_path, &args.tle_url, max_age)?;
        if downloaded {
            log::info!("TLE cache refreshed: {}", args.tle_path.display());
        } else {
            log::info!("TLE cache is fresh: {}", args.tle_path.display());
        }
    }

    let catalog = TleCatalog::load(&args.tle_path)?;
    if catalog.is_empty() {
        return Err(anyhow!(
            "TLE catalog {} contains no usable records",
            args.tle_path.display()
        ));
    }

    let mut store = SqliteSatelliteStore::open(&args.db_path)?;
    let summary = satellite::update_satellites(&catalog, &mut store, Utc::now())?;
    println!(
        "updated {} satellites ({} skipped); store now holds {}",
        summary.propagated,
        summary.skipped,
        store.count()?
    );
    Ok(())
}
