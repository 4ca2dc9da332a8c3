//! Tests for config module

use std::io::Write;
use std::path::Path;

use serial_test::serial;
use tempfile::NamedTempFile;

use onair::config::Config;
use onair::models::{ChannelId, ChannelType};

const ENV_KEYS: &[&str] = &[
    "ONAIR_TICK_INTERVAL_SECS",
    "ONAIR_HORIZON_SECS",
    "ONAIR_WORKER_POOL_SIZE",
    "ONAIR_SQLITE_PATH",
    "ONAIR_BIND_ADDRESS",
    "ONAIR_LOG_FORMAT",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(
        config_path.exists(),
        "config.toml should exist in project root"
    );
}

#[test]
fn test_sample_config_loads_and_validates() {
    let config = Config::from_file(Path::new("config.toml")).expect("config.toml should parse");
    config.validate().expect("config.toml should be valid");

    assert_eq!(config.scheduler.horizon_secs, 86400);
    assert_eq!(config.channels.len(), 2);

    let movies = &config.channels[1];
    assert_eq!(movies.id, ChannelId::from("classic-movies"));
    assert_eq!(movies.channel_type, ChannelType::Fast);
    assert_eq!(movies.feeds.len(), 2);
    assert_eq!(movies.horizon_or(config.scheduler.horizon()).num_hours(), 48);
}

#[test]
fn test_partial_file_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\nhorizon_secs = 3600").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.scheduler.horizon_secs, 3600);
    assert_eq!(config.scheduler.tick_interval_secs, 60);
    assert_eq!(config.feeds.requests_per_second, 5);
    assert!(config.channels.is_empty());
}

#[test]
fn test_malformed_file_is_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler\nhorizon_secs = ").unwrap();

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_invalid_feed_url_fails_validation() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"[[channels]]
id = "bad"
tenant_id = "acme"
name = "Bad"
feeds = ["not a url"]"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("invalid feed URL"));
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    std::env::set_var("ONAIR_HORIZON_SECS", "7200");
    std::env::set_var("ONAIR_WORKER_POOL_SIZE", "2");
    std::env::set_var("ONAIR_SQLITE_PATH", "/tmp/onair-test.db");
    std::env::set_var("ONAIR_LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.scheduler.horizon_secs, 7200);
    assert_eq!(config.scheduler.worker_pool_size, 2);
    assert_eq!(config.scheduler.tick_interval_secs, 60);
    assert_eq!(config.database.sqlite_path, Path::new("/tmp/onair-test.db"));
    assert_eq!(config.logging.format, "json");
}

#[test]
#[serial]
fn test_env_unparsable_number_falls_back() {
    clear_env();
    std::env::set_var("ONAIR_TICK_INTERVAL_SECS", "soon");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.scheduler.tick_interval_secs, 60);
}

#[test]
#[serial]
fn test_env_bad_bind_address_is_error() {
    clear_env();
    std::env::set_var("ONAIR_BIND_ADDRESS", "localhost:http");

    let result = Config::from_env();
    clear_env();

    assert!(result.is_err());
}
