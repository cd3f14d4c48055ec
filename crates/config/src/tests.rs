use super::*;
use std::fs;
use std::io::Write;
use tempfile::tempdir;

#[test]
fn defaults_match_documented_tunables() {
    let config = AppConfig::default();
    assert_eq!(config.detector.worker_count, 16);
    assert_eq!(config.detector.window_seconds, 300);
    assert_eq!(config.detector.input_queue_capacity, 100_000);
    assert_eq!(config.detector.signal_queue_capacity, 1_000);
    assert_eq!(config.source.query_interval_ms, 1_000);
    assert_eq!(config.source.init_window_minutes, 5);
    assert_eq!(config.source.batch_size, 10_000);
    assert_eq!(config.gate.send_cooldown_minutes, 60);
    assert_eq!(config.gate.skip_cooldown_minutes, 30);
    assert!((config.gate.bundle_ratio_max - 0.30).abs() < f64::EPSILON);
    assert!((config.gate.phishing_ratio_max - 20.0).abs() < f64::EPSILON);
    assert_eq!(config.gate.min_holder_count, 200);
    assert!(config.publisher.feishu_webhook_url.is_empty());
}

#[test]
fn partial_toml_falls_back_to_defaults() {
    let raw = r#"
[system]
log_level = "debug"

[publisher]
feishu_webhook_url = "https://example.test/hook"
"#;
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    let mut file = fs::File::create(&path).expect("create config");
    file.write_all(raw.as_bytes()).expect("write config");

    let config = load_from_path(&path).expect("load config");
    assert_eq!(config.system.log_level, "debug");
    assert_eq!(config.publisher.feishu_webhook_url, "https://example.test/hook");
    assert_eq!(config.detector.worker_count, 16);
    assert_eq!(config.sqlite.migrations_dir, "migrations");
}

#[test]
fn rejects_malformed_toml() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[system\nlog_level = ").expect("write config");
    assert!(load_from_path(&path).is_err());
}
