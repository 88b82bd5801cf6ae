use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compress::CompressionPolicy;
use crate::detect::backends::hosted::DEFAULT_API_URL;
use crate::detect::HostedInferenceConfig;
use crate::satellite::max_age_from_days;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5001";
const DEFAULT_DB_PATH: &str = "lookup.db";
const DEFAULT_TLE_PATH: &str = "stations.tle";
const DEFAULT_TLE_URL: &str = "https://celestrak.org/NORAD/elements/gp.php?GROUP=active&FORMAT=tle";
const DEFAULT_TLE_MAX_AGE_DAYS: u64 = 7;
const DEFAULT_MODEL_ID: &str = "my-first-project-hqotd/1";
const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_INFLIGHT: usize = 8;

#[derive(Debug, Deserialize, Default)]
struct LookupConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    inference: Option<InferenceConfigFile>,
    compression: Option<CompressionConfigFile>,
    satellites: Option<SatelliteConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
    max_inflight: Option<usize>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    api_url: Option<String>,
    api_key: Option<String>,
    model_id: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CompressionConfigFile {
    max_dimension: Option<u32>,
    quality: Option<u8>,
    min_quality: Option<u8>,
    min_dimension: Option<u32>,
    budget_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SatelliteConfigFile {
    tle_path: Option<PathBuf>,
    tle_url: Option<String>,
    max_age_days: Option<u64>,
}

/// Service configuration, passed explicitly to everything that needs it.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    pub db_path: String,
    pub api: ApiSettings,
    pub inference: InferenceSettings,
    pub compression: CompressionPolicy,
    pub satellites: SatelliteSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub max_upload_bytes: usize,
    pub max_inflight: usize,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub api_url: String,
    pub api_key: String,
    pub model_id: String,
    pub timeout: Duration,
}

impl InferenceSettings {
    pub fn hosted_config(&self) -> HostedInferenceConfig {
        HostedInferenceConfig {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SatelliteSettings {
    pub tle_path: PathBuf,
    pub tle_url: String,
    pub max_age: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        // Defaults only; every field is optional in the file form.
        Self::from_file(LookupConfigFile::default())
    }
}

impl LookupConfig {
    /// File named by `LOOKUP_CONFIG` (JSON, or TOML by extension), then
    /// `LOOKUP_*` env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LOOKUP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LookupConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let api_file = file.api.unwrap_or_default();
        let api = ApiSettings {
            addr: api_file
                .addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api_file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            max_inflight: api_file.max_inflight.unwrap_or(DEFAULT_MAX_INFLIGHT),
            font_path: api_file.font_path,
        };

        let inference_file = file.inference.unwrap_or_default();
        let inference = InferenceSettings {
            api_url: inference_file
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: inference_file.api_key.unwrap_or_default(),
            model_id: inference_file
                .model_id
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            timeout: Duration::from_secs(
                inference_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_SECS),
            ),
        };

        let defaults = CompressionPolicy::default();
        let compression = match file.compression {
            Some(c) => CompressionPolicy {
                initial_max_dimension: c.max_dimension.unwrap_or(defaults.initial_max_dimension),
                initial_quality: c.quality.unwrap_or(defaults.initial_quality),
                min_quality: c.min_quality.unwrap_or(defaults.min_quality),
                min_dimension: c.min_dimension.unwrap_or(defaults.min_dimension),
                budget_bytes: c.budget_bytes.unwrap_or(defaults.budget_bytes),
                ..defaults
            },
            None => defaults,
        };

        let satellites_file = file.satellites.unwrap_or_default();
        let satellites = SatelliteSettings {
            tle_path: satellites_file
                .tle_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TLE_PATH)),
            tle_url: satellites_file
                .tle_url
                .unwrap_or_else(|| DEFAULT_TLE_URL.to_string()),
            max_age: max_age_from_days(
                satellites_file
                    .max_age_days
                    .unwrap_or(DEFAULT_TLE_MAX_AGE_DAYS),
            ),
        };

        Self {
            db_path,
            api,
            inference,
            compression,
            satellites,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("LOOKUP_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(path) = non_empty_env("LOOKUP_DB_PATH") {
            self.db_path = path;
        }
        if let Some(path) = non_empty_env("LOOKUP_TLE_PATH") {
            self.satellites.tle_path = PathBuf::from(path);
        }
        if let Some(url) = non_empty_env("LOOKUP_INFERENCE_URL") {
            self.inference.api_url = url;
        }
        if let Some(key) = non_empty_env("LOOKUP_INFERENCE_API_KEY") {
            self.inference.api_key = key;
        }
        if let Some(model_id) = non_empty_env("LOOKUP_MODEL_ID") {
            self.inference.model_id = model_id;
        }
        if let Some(path) = non_empty_env("LOOKUP_FONT_PATH") {
            self.api.font_path = Some(PathBuf::from(path));
        }
        if let Some(limit) = non_empty_env("LOOKUP_MAX_UPLOAD_BYTES") {
            self.api.max_upload_bytes = limit
                .parse()
                .map_err(|_| anyhow!("LOOKUP_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.inference.model_id = self.inference.model_id.trim().to_string();
        if self.inference.model_id.is_empty() {
            return Err(anyhow!("inference model_id must not be empty"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("api max_upload_bytes must be greater than zero"));
        }
        if self.api.max_inflight == 0 {
            return Err(anyhow!("api max_inflight must be greater than zero"));
        }
        self.compression
            .validate()
            .map_err(|e| anyhow!("compression: {}", e))?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<LookupConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let cfg = LookupConfig::default();
        assert_eq!(cfg.api.addr, "127.0.0.1:5001");
        assert_eq!(cfg.inference.api_url, "https://detect.roboflow.com");
        assert_eq!(cfg.compression, CompressionPolicy::default());
        assert_eq!(cfg.satellites.max_age.as_secs(), 7 * 24 * 3600);
    }

    #[test]
    fn partial_compression_section_keeps_other_defaults() {
        let file: LookupConfigFile =
            serde_json::from_str(r#"{"compression": {"quality": 100}}"#).unwrap();
        let cfg = LookupConfig::from_file(file);
        assert_eq!(cfg.compression.initial_quality, 100);
        assert_eq!(cfg.compression.initial_max_dimension, 1024);
        assert_eq!(cfg.compression.min_dimension, 200);
    }

    #[test]
    fn validate_rejects_blank_model() {
        let mut cfg = LookupConfig::default();
        cfg.inference.model_id = "   ".to_string();
        assert!(cfg.validate().is_err());
    }
}
