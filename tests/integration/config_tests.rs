use dupelink::config::{ConfigError, Overrides, Settings, ENV_PREFIX};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_config_load_from_env() {
    std::env::set_var("DUPELINK_IT_CHUNK_SIZE", "8192");
    std::env::set_var("DUPELINK_IT_SKIP_HIDDEN", "true");

    // A distinct prefix keeps this test independent of the real one.
    let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Env::prefixed("DUPELINK_IT_"))
        .extract()
        .unwrap();

    assert_eq!(settings.chunk_size, 8192);
    assert!(settings.skip_hidden);
    assert_eq!(settings.hasher().chunk_size(), 8192);

    std::env::remove_var("DUPELINK_IT_CHUNK_SIZE");
    std::env::remove_var("DUPELINK_IT_SKIP_HIDDEN");
}

#[test]
fn test_env_prefix() {
    assert_eq!(ENV_PREFIX, "DUPELINK_");
}

#[test]
fn test_load_layers_file_then_overrides() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
db = "/srv/index.db"
jobs = 6
follow_symlinks = true
max_depth = 12
ignore_patterns = ["*.iso"]
verify_mtime = false
busy_retries = 3
busy_backoff_ms = 25
"#,
    )
    .unwrap();

    let overrides = Overrides {
        jobs: Some(2),
        ignore_patterns: Some(vec!["*.tmp".to_string()]),
        ..Overrides::default()
    };
    let settings = Settings::load(Some(&path), &overrides).unwrap();

    assert_eq!(settings.db, PathBuf::from("/srv/index.db"));
    assert_eq!(settings.jobs(), 2);
    assert!(!settings.verify_mtime);

    let walker = settings.walker_config();
    assert!(walker.follow_symlinks);
    assert_eq!(walker.max_depth, 12);
    assert_eq!(walker.ignore_patterns, vec!["*.tmp".to_string()]);

    let retry = settings.retry_policy();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.initial_backoff, Duration::from_millis(25));
    assert_eq!(retry.backoff(2), Duration::from_millis(50));
}

#[test]
fn test_invalid_config_value_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "busy_retries = \"lots\"\n").unwrap();

    let err = Settings::load(Some(&path), &Overrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("busy_retries"));
}

#[test]
fn test_unknown_keys_are_ignored() {
    let figment = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::string("theme = \"dark\"\nskip_hidden = true\n"));
    let settings: Settings = figment.extract().unwrap();
    assert!(settings.skip_hidden);
}
