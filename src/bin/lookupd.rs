//! lookupd - HTTP service for the LookUp app
//!
//! This daemon:
//! 1. Loads configuration (`LOOKUP_CONFIG` file + `LOOKUP_*` env)
//! 2. Refreshes the TLE cache and seeds the satellite store
//! 3. Serves the detection and satellite endpoints until Ctrl-C

use anyhow::Result;
use chrono::Utc;
use std::sync::mpsc;
use std::sync::Arc;

use lookup_api::annotate::Annotator;
use lookup_api::api::{ApiConfig, ApiServer, ApiState};
use lookup_api::config::LookupConfig;
use lookup_api::detect::{DetectionPipeline, HostedInferenceClient};
use lookup_api::satellite::{self, LiveCatalog, SatelliteStore, SqliteSatelliteStore};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = LookupConfig::load()?;
    if config.inference.api_key.is_empty() {
        log::warn!("LOOKUP_INFERENCE_API_KEY is not set; inference requests will be rejected upstream");
    }

    let client = HostedInferenceClient::new(config.inference.hosted_config())?;
    let pipeline = DetectionPipeline::new(
        Arc::new(client),
        config.inference.model_id.clone(),
        config.compression.clone(),
    );

    let annotator = match &config.api.font_path {
        Some(path) => Annotator::new().with_font_file(path)?,
        None => Annotator::new(),
    };

    let catalog = load_catalog(&config);
    let mut store = SqliteSatelliteStore::open(&config.db_path)?;
    let snapshot = catalog.current();
    if !snapshot.is_empty() {
        satellite::update_satellites(&snapshot, &mut store, Utc::now())?;
    }
    log::info!("satellite store {} holds {} positions", config.db_path, store.count()?);

    let state = ApiState::new(pipeline, annotator, Box::new(store), catalog);
    let api_handle = ApiServer::new(ApiConfig::from(&config.api), state).spawn()?;
    log::info!(
        "lookupd running on {} (model {})",
        api_handle.addr,
        config.inference.model_id
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("lookupd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}

/// A stale or missing cache is not fatal: serve with whatever is on disk,
/// and pick up later rewrites of the cache file.
fn load_catalog(config: &LookupConfig) -> LiveCatalog {
    let settings = &config.satellites;
    if let Err(err) =
        satellite::refresh_if_stale(&settings.tle_path, &settings.tle_url, settings.max_age)
    {
        log::warn!("TLE refresh failed: {:#}", err);
    }
    let catalog = LiveCatalog::from_file(&settings.tle_path);
    if catalog.current().is_empty() {
        log::warn!(
            "no TLE records in {}, satellite queries stay empty until it is refreshed",
            settings.tle_path.display()
        );
    }
    catalog
}
