use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub sqlite: SqliteConfig,
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub gate: GateConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: String,
    pub migrations_dir: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "state/memesignal.db".to_string(),
            migrations_dir: "migrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub query_interval_ms: u64,
    pub init_window_minutes: i64,
    pub batch_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            query_interval_ms: 1_000,
            init_window_minutes: 5,
            batch_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub worker_count: usize,
    pub window_seconds: i64,
    pub input_queue_capacity: usize,
    pub signal_queue_capacity: usize,
    pub signal_cooldown_minutes: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            worker_count: 16,
            window_seconds: 300,
            input_queue_capacity: 100_000,
            signal_queue_capacity: 1_000,
            signal_cooldown_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub send_cooldown_minutes: i64,
    pub skip_cooldown_minutes: i64,
    pub bundle_ratio_max: f64,
    pub phishing_ratio_max: f64,
    pub min_holder_count: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            send_cooldown_minutes: 60,
            skip_cooldown_minutes: 30,
            bundle_ratio_max: 0.30,
            phishing_ratio_max: 20.0,
            min_holder_count: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub feishu_webhook_url: String,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            feishu_webhook_url: String::new(),
            publish_timeout_ms: 10_000,
        }
    }
}
