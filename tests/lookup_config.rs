use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use lookup_api::config::LookupConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LOOKUP_CONFIG",
        "LOOKUP_API_ADDR",
        "LOOKUP_DB_PATH",
        "LOOKUP_TLE_PATH",
        "LOOKUP_INFERENCE_URL",
        "LOOKUP_INFERENCE_API_KEY",
        "LOOKUP_MODEL_ID",
        "LOOKUP_MAX_UPLOAD_BYTES",
        "LOOKUP_FONT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "lookup_prod.db",
        "api": {
            "addr": "0.0.0.0:8080",
            "max_inflight": 4
        },
        "inference": {
            "api_url": "https://inference.example.test",
            "model_id": "sky-objects/7",
            "timeout_secs": 5
        },
        "compression": {
            "max_dimension": 800,
            "budget_bytes": 1048576
        },
        "satellites": {
            "tle_path": "/var/cache/lookup/active.tle",
            "max_age_days": 1
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("LOOKUP_CONFIG", file.path());
    std::env::set_var("LOOKUP_MODEL_ID", "sky-objects/8");
    std::env::set_var("LOOKUP_INFERENCE_API_KEY", "secret-key");
    std::env::set_var("LOOKUP_MAX_UPLOAD_BYTES", "1000000");
    std::env::set_var("LOOKUP_FONT_PATH", "/usr/share/fonts/label.ttf");

    let cfg = LookupConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "lookup_prod.db");
    assert_eq!(cfg.api.addr, "0.0.0.0:8080");
    assert_eq!(cfg.api.max_inflight, 4);
    assert_eq!(cfg.api.max_upload_bytes, 1_000_000);
    assert_eq!(
        cfg.api.font_path,
        Some(PathBuf::from("/usr/share/fonts/label.ttf"))
    );
    assert_eq!(cfg.inference.api_url, "https://inference.example.test");
    assert_eq!(cfg.inference.api_key, "secret-key");
    assert_eq!(cfg.inference.model_id, "sky-objects/8");
    assert_eq!(cfg.inference.timeout.as_secs(), 5);
    assert_eq!(cfg.compression.initial_max_dimension, 800);
    assert_eq!(cfg.compression.initial_quality, 85);
    assert_eq!(cfg.compression.budget_bytes, 1_048_576);
    assert_eq!(
        cfg.satellites.tle_path,
        PathBuf::from("/var/cache/lookup/active.tle")
    );
    assert_eq!(cfg.satellites.max_age.as_secs(), 24 * 3600);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
db_path = "lookup_toml.db"

[api]
addr = "127.0.0.1:6001"

[compression]
quality = 90
min_dimension = 150
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("LOOKUP_CONFIG", file.path());
    std::env::set_var("LOOKUP_DB_PATH", "override.db");

    let cfg = LookupConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.api.addr, "127.0.0.1:6001");
    assert_eq!(cfg.compression.initial_quality, 90);
    assert_eq!(cfg.compression.min_dimension, 150);
    assert_eq!(cfg.inference.model_id, "my-first-project-hqotd/1");

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = LookupConfig::load().expect("load defaults");
    assert_eq!(cfg.api.addr, "127.0.0.1:5001");
    assert_eq!(cfg.db_path, "lookup.db");
    assert_eq!(cfg.satellites.tle_path, PathBuf::from("stations.tle"));
    assert_eq!(cfg.inference.api_url, "https://detect.roboflow.com");
    assert!(cfg.api.font_path.is_none());
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LOOKUP_MAX_UPLOAD_BYTES", "lots");
    assert!(LookupConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"compression": {"max_dimension": 100, "min_dimension": 200}}"#)
        .expect("write config");
    std::env::set_var("LOOKUP_CONFIG", file.path());
    assert!(LookupConfig::load().is_err());
    clear_env();

    std::env::set_var("LOOKUP_CONFIG", "/nonexistent/lookup.json");
    assert!(LookupConfig::load().is_err());
    clear_env();
}

#[test]
fn huge_tle_max_age_saturates() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"satellites": {"max_age_days": 18446744073709551615}}"#)
        .expect("write config");
    std::env::set_var("LOOKUP_CONFIG", file.path());

    let cfg = LookupConfig::load().expect("load config");
    assert_eq!(cfg.satellites.max_age.as_secs(), u64::MAX);
    clear_env();
}
