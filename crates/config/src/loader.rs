use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::AppConfig;

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

/// Load from `MEMESIGNAL_CONFIG` when set, else `default_path`, then apply
/// targeted env overrides. Returns the config and the path actually used.
pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let configured = env::var("MEMESIGNAL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path.to_path_buf());
    let mut config = load_from_path(&configured)?;

    if let Ok(level) = env::var("MEMESIGNAL_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.system.log_level = trimmed.to_string();
        }
    }
    if let Ok(path) = env::var("MEMESIGNAL_SQLITE_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            config.sqlite.path = trimmed.to_string();
        }
    }
    if let Ok(url) = env::var("MEMESIGNAL_FEISHU_WEBHOOK_URL") {
        config.publisher.feishu_webhook_url = url.trim().to_string();
    }
    if let Some(worker_count) = env::var("MEMESIGNAL_WORKER_COUNT")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        config.detector.worker_count = worker_count;
    }
    if let Some(batch_size) = env::var("MEMESIGNAL_SOURCE_BATCH_SIZE")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        config.source.batch_size = batch_size;
    }

    Ok((config, configured))
}
