//! LookUp API
//!
//! This crate implements the service behind the LookUp app: object detection
//! on uploaded photos and "which satellites are above me" queries.
//!
//! # Architecture
//!
//! The detection path is a short, request-scoped pipeline:
//!
//! 1. **Compress**: the upload is downscaled and re-encoded until it fits the
//!    inference service's payload limit ([`compress`]).
//! 2. **Infer**: the payload goes to a remote detector ([`detect::InferenceClient`]).
//! 3. **Filter + suppress**: low-confidence boxes are dropped, then greedy NMS
//!    removes duplicates ([`detect::nms`]).
//! 4. **Rescale**: surviving boxes are mapped back to original image
//!    coordinates ([`detect::rescale`]).
//!
//! The satellite path ingests TLE data, propagates ground positions and
//! answers nearby queries against a geo store ([`satellite`]).
//!
//! # Module Structure
//!
//! - `detect`: detection types, IoU/NMS, rescaling, inference clients, pipeline
//! - `compress`: adaptive payload compressor
//! - `annotate`: box drawing onto images
//! - `satellite`: TLE catalog, propagation, geo store
//! - `api`: HTTP server
//! - `config`: file + env configuration

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};

pub mod annotate;
pub mod api;
pub mod compress;
pub mod config;
pub mod detect;
pub mod satellite;

pub use compress::{
    compress_for_inference, CompressError, CompressedPayload, CompressionPolicy,
    CompressionState, JpegPayloadEncoder, PayloadEncoder,
};
pub use detect::{
    BoundingBox, BoxCorners, Detection, DetectionPipeline, DetectionRequest, InferenceClient,
    ScaleFactors,
};
pub use satellite::{
    GeoPoint, InMemorySatelliteStore, LiveCatalog, SatellitePosition, SatelliteStore,
    SqliteSatelliteStore, TleCatalog,
};

/// URI for a fresh, uniquely named shared in-memory SQLite database.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:lookup_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
