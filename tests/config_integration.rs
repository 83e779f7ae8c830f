//! Configuration file integration tests.

use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use wishcake::config::Config;
use wishcake::error::ConfigError;

#[test]
fn test_load_partial_config_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("wishcake.json");
    fs::write(
        &path,
        r#"{
            "celebration": { "blow_threshold": 55.5, "allow_manual_skip": false },
            "generation": { "image_timeout_secs": 5 }
        }"#,
    )
    .expect("Failed to write config");

    let config = Config::load_from_file(&path).expect("Failed to load config");
    assert_eq!(config.celebration.blow_threshold, 55.5);
    assert!(!config.celebration.allow_manual_skip);
    assert_eq!(config.celebration.gift_opening(), Duration::from_millis(1000));
    assert_eq!(config.generation.image_timeout(), Duration::from_secs(5));
    assert_eq!(config.generation.api_key_env, "API_KEY");
}

#[test]
fn test_invalid_json_is_parse_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("broken.json");
    fs::write(&path, "{ not json").expect("Failed to write config");

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));

    let fallback = Config::load_or_default(Some(&path));
    assert_eq!(fallback.celebration.blow_threshold, 70.0);
}

#[test]
fn test_round_trip_through_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("saved.json");
    let mut config = Config::default();
    config.audio.play_sounds = false;
    config.celebration.frame_rate_hz = 30;

    fs::write(&path, serde_json::to_string_pretty(&config).expect("Failed to serialise"))
        .expect("Failed to write config");
    let loaded = Config::load_from_file(&path).expect("Failed to load config");
    assert!(!loaded.audio.play_sounds);
    assert_eq!(loaded.celebration.frame_rate_hz, 30);
}
