//! TLE catalog: download cache and parsing.
//!
//! The catalog file is the plain three-line format served by CelesTrak
//! (`name`, `1 ...`, `2 ...`). It is re-downloaded when missing or older
//! than the configured maximum age.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use super::propagate::{propagate, Geodetic};

const MAX_CATALOG_BYTES: u64 = 64 * 1024 * 1024;
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// One named element set.
pub struct TleEntry {
    pub name: String,
    elements: sgp4::Elements,
}

impl TleEntry {
    pub fn elements(&self) -> &sgp4::Elements {
        &self.elements
    }

    pub fn position_at(&self, at: DateTime<Utc>) -> Result<Geodetic> {
        propagate(&self.elements, at)
            .with_context(|| format!("propagate {}", self.name))
    }
}

/// Parsed catalog with lookup by name. Later duplicates win the lookup.
#[derive(Default)]
pub struct TleCatalog {
    entries: Vec<TleEntry>,
    by_name: HashMap<String, usize>,
}

impl TleCatalog {
    /// Parse catalog text. Records that do not parse are skipped.
    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text
            .lines()
            .map(|line| line.trim_end())
            .filter(|line| !line.is_empty())
            .collect();

        let mut catalog = TleCatalog::default();
        let mut skipped = 0usize;
        let mut i = 0;
        while i < lines.len() {
            let is_record = i + 2 < lines.len()
                && lines[i + 1].starts_with("1 ")
                && lines[i + 2].starts_with("2 ");
            if !is_record {
                skipped += 1;
                i += 1;
                continue;
            }
            let name = lines[i].trim();
            match sgp4::Elements::from_tle(
                Some(name.to_string()),
                lines[i + 1].as_bytes(),
                lines[i + 2].as_bytes(),
            ) {
                Ok(elements) => catalog.push(name.to_string(), elements),
                Err(err) => {
                    log::warn!("skipping TLE record {}: {}", name, err);
                    skipped += 1;
                }
            }
            i += 3;
        }
        if skipped > 0 {
            log::warn!("TLE catalog: {} malformed line(s)/record(s) skipped", skipped);
        }
        catalog
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read TLE catalog {}", path.display()))?;
        let catalog = Self::parse(&text);
        log::info!("loaded {} satellites from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    fn push(&mut self, name: String, elements: sgp4::Elements) {
        self.by_name.insert(name.clone(), self.entries.len());
        self.entries.push(TleEntry { name, elements });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TleEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &TleEntry> {
        self.entries.iter()
    }
}

/// Catalog served from the cache file. `current` re-reads the file when its
/// modification time or size changes, so a refresh by another process is
/// picked up without a restart.
pub struct LiveCatalog {
    path: Option<PathBuf>,
    loaded: RwLock<LoadedCatalog>,
}

struct LoadedCatalog {
    catalog: Arc<TleCatalog>,
    stamp: Option<FileStamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Result<Self> {
        let metadata =
            std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
        Ok(Self {
            modified: metadata.modified()?,
            len: metadata.len(),
        })
    }
}

impl LiveCatalog {
    /// A catalog with no backing file; never reloads.
    pub fn fixed(catalog: TleCatalog) -> Self {
        Self {
            path: None,
            loaded: RwLock::new(LoadedCatalog {
                catalog: Arc::new(catalog),
                stamp: None,
            }),
        }
    }

    /// Track `path`. A missing or unreadable file yields an empty catalog
    /// until the file appears.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let live = Self {
            path: Some(path.into()),
            loaded: RwLock::new(LoadedCatalog {
                catalog: Arc::new(TleCatalog::default()),
                stamp: None,
            }),
        };
        live.current();
        live
    }

    /// The catalog as of the file's latest contents.
    pub fn current(&self) -> Arc<TleCatalog> {
        let Some(path) = &self.path else {
            return self.snapshot();
        };
        let stamp = match FileStamp::of(path) {
            Ok(stamp) => stamp,
            Err(err) => {
                log::debug!("keeping loaded TLE catalog: {:#}", err);
                return self.snapshot();
            }
        };
        {
            let loaded = self.loaded.read().unwrap_or_else(PoisonError::into_inner);
            if loaded.stamp == Some(stamp) {
                return loaded.catalog.clone();
            }
        }

        let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        if loaded.stamp != Some(stamp) {
            match TleCatalog::load(path) {
                Ok(catalog) => loaded.catalog = Arc::new(catalog),
                Err(err) => log::warn!("TLE catalog reload failed, keeping previous: {:#}", err),
            }
            // A broken file is retried only once it changes again.
            loaded.stamp = Some(stamp);
        }
        loaded.catalog.clone()
    }

    fn snapshot(&self) -> Arc<TleCatalog> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .catalog
            .clone()
    }
}

/// Cache age limit from a day count; huge values saturate instead of
/// overflowing.
pub fn max_age_from_days(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(SECS_PER_DAY))
}

/// True when `path` is missing or was last modified at least `max_age` ago.
pub fn needs_refresh(path: &Path, max_age: Duration) -> Result<bool> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
    };
    let modified = metadata.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Ok(age >= max_age)
}

/// Download the catalog to `path` when it is stale. Returns true when a
/// download happened.
pub fn refresh_if_stale(path: &Path, url: &str, max_age: Duration) -> Result<bool> {
    if !needs_refresh(path, max_age)? {
        return Ok(false);
    }
    log::info!("downloading TLE catalog from {}", url);
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch TLE catalog from {}", url))?;
    let mut body = String::new();
    response
        .into_reader()
        .take(MAX_CATALOG_BYTES)
        .read_to_string(&mut body)
        .context("read TLE catalog")?;
    if body.trim().is_empty() {
        return Err(anyhow!("empty TLE catalog from {}", url));
    }

    let tmp = path.with_extension("tle.partial");
    std::fs::write(&tmp, &body).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
pub(crate) const ISS_TLE: &str = "ISS (ZARYA)
1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992
2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008
";
