use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod swap_log;
mod token_meta;

pub use self::swap_log::{NewSwap, SwapRow, ACTION_BUY, ACTION_SELL, ACTION_TRANSFER};
pub use self::token_meta::{TokenHolderRow, TokenInfoRow};

/// Embedded store behind every repository contract. One instance per
/// task; connections are never shared across tasks.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create sqlite parent dir: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db: {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy_timeout")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to set sqlite journal mode WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set sqlite synchronous NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")?;

        Ok(Self { conn })
    }

    /// Apply every `*.sql` file under `dir` in lexical order, once each.
    /// Returns the number of newly applied migrations.
    pub fn run_migrations(&mut self, dir: &Path) -> Result<usize> {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("failed to read migrations dir: {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
            .collect();
        entries.sort();

        let mut applied = 0;
        for path in entries {
            let version = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            let already: bool = self
                .conn
                .query_row(
                    "SELECT COUNT(1) FROM schema_migrations WHERE version = ?1",
                    [&version],
                    |row| row.get::<_, i64>(0),
                )
                .context("failed to check schema_migrations")?
                > 0;
            if already {
                continue;
            }

            let sql = fs::read_to_string(&path)
                .with_context(|| format!("failed to read migration: {}", path.display()))?;
            let tx = self.conn.transaction().context("failed to begin migration tx")?;
            tx.execute_batch(&sql)
                .with_context(|| format!("failed to apply migration: {}", path.display()))?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, format_ts(Utc::now())],
            )
            .context("failed to record migration version")?;
            tx.commit().context("failed to commit migration")?;
            applied += 1;
        }
        Ok(applied)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Fixed-width RFC 3339 so lexical TEXT comparison in SQL matches
/// chronological order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp: {raw}"))
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid stored decimal: {raw}"))
}
