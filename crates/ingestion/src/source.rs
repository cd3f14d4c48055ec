use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use memesignal_config::SourceConfig;
use memesignal_core_types::{Trade, TradeAction};
use memesignal_storage::{SqliteStore, SwapRow, ACTION_BUY, ACTION_SELL};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{SourceStream, TradeSource};

const TRADE_CHANNEL_CAPACITY: usize = 10_000;
const ERROR_CHANNEL_CAPACITY: usize = 100;
const BOOTSTRAP_BATCH_PAUSE_MS: u64 = 100;
const BACKEND_RETRY_PAUSE_MS: u64 = 1_000;

/// Drops transfer and malformed rows; the emitted trade id is
/// `"{tx_hash}_{inst_idx}"`.
pub fn convert_swap(row: &SwapRow) -> Option<Trade> {
    let action = match row.action {
        ACTION_BUY => TradeAction::Buy,
        ACTION_SELL => TradeAction::Sell,
        _ => return None,
    };
    if row.price_usd.is_sign_negative() || row.price_usd.is_zero() {
        return None;
    }
    if row.amount_usd.is_sign_negative() || row.amount_usd.is_zero() {
        return None;
    }

    Some(Trade {
        id: format!("{}_{}", row.tx_hash, row.inst_idx_in_tx),
        signature: row.tx_hash.clone(),
        instruction_index: row.inst_idx_in_tx.clone(),
        slot: row.block_id,
        block_time: row.block_time,
        user_wallet: row.user_wallet.clone(),
        token_address: row.token_address.clone(),
        amount_usd: row.amount_usd,
        price_usd: row.price_usd,
        action,
    })
}

/// Incremental cursor over the append-only swap log: a bounded bootstrap
/// over the last few minutes, then id-ordered polling.
pub struct DatabaseSource {
    sqlite_path: PathBuf,
    config: SourceConfig,
    initial_loaded: Arc<AtomicBool>,
    dropped_records: Arc<AtomicU64>,
}

impl DatabaseSource {
    pub fn new(sqlite_path: impl Into<PathBuf>, config: SourceConfig) -> Self {
        Self {
            sqlite_path: sqlite_path.into(),
            config,
            initial_loaded: Arc::new(AtomicBool::new(false)),
            dropped_records: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TradeSource for DatabaseSource {
    fn name(&self) -> &'static str {
        "database"
    }

    fn is_initial_loaded(&self) -> bool {
        self.initial_loaded.load(Ordering::Acquire)
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<SourceStream> {
        let (trade_tx, trade_rx) = mpsc::channel(TRADE_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let poller = Poller {
            sqlite_path: self.sqlite_path.clone(),
            config: self.config.clone(),
            initial_loaded: Arc::clone(&self.initial_loaded),
            dropped_records: Arc::clone(&self.dropped_records),
            trade_tx,
            error_tx,
        };
        tokio::spawn(poller.run(cancel));

        info!(
            query_interval_ms = self.config.query_interval_ms,
            init_window_minutes = self.config.init_window_minutes,
            batch_size = self.config.batch_size,
            "database source started"
        );
        Ok(SourceStream {
            trades: trade_rx,
            errors: error_rx,
        })
    }
}

struct Poller {
    sqlite_path: PathBuf,
    config: SourceConfig,
    initial_loaded: Arc<AtomicBool>,
    dropped_records: Arc<AtomicU64>,
    trade_tx: mpsc::Sender<Trade>,
    error_tx: mpsc::Sender<anyhow::Error>,
}

impl Poller {
    // The store stays a local owned value and is only borrowed between
    // suspension points, keeping this future spawnable.
    async fn run(self, cancel: CancellationToken) {
        let store = match SqliteStore::open(&self.sqlite_path)
            .with_context(|| format!("failed to open source db: {}", self.sqlite_path.display()))
        {
            Ok(store) => store,
            Err(error) => {
                self.send_error(error, &cancel).await;
                return;
            }
        };

        // Bootstrap: walk the log from just before the first id inside
        // the init window until a short batch, emitting only records
        // inside the window.
        let since = Utc::now() - Duration::minutes(self.config.init_window_minutes.max(0));
        let min_id = loop {
            match store.min_id_since(since) {
                Ok(min_id) => break min_id,
                Err(error) => {
                    self.send_error(error.context("bootstrap min-id query failed"), &cancel)
                        .await;
                    if !pause(BACKEND_RETRY_PAUSE_MS, &cancel).await {
                        return;
                    }
                }
            }
        };

        let mut last_id = 0u64;
        if min_id == 0 {
            info!("no trades inside the init window, bootstrap empty");
        } else {
            let mut cursor = min_id - 1;
            let mut processed = 0usize;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let rows = match store.swaps_after_id(cursor, self.config.batch_size) {
                    Ok(rows) => rows,
                    Err(error) => {
                        self.send_error(error.context("bootstrap batch query failed"), &cancel)
                            .await;
                        if !pause(BACKEND_RETRY_PAUSE_MS, &cancel).await {
                            return;
                        }
                        continue;
                    }
                };
                let batch_len = rows.len();

                for row in rows {
                    cursor = row.id;
                    if row.block_time < since {
                        continue;
                    }
                    if !self.emit(&row, &cancel).await {
                        return;
                    }
                    processed += 1;
                }

                if batch_len < self.config.batch_size {
                    break;
                }
                // Pace full-batch reads so the backend is not hammered.
                if !pause(BOOTSTRAP_BATCH_PAUSE_MS, &cancel).await {
                    return;
                }
            }
            last_id = cursor;
            info!(total_processed = processed, last_id, "bootstrap query finished");
        }

        self.initial_loaded.store(true, Ordering::Release);
        info!(last_id, "bootstrap complete, entering incremental polling");

        let mut ticker = time::interval(std::time::Duration::from_millis(
            self.config.query_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("database source cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let rows = match store.swaps_after_id(last_id, self.config.batch_size) {
                Ok(rows) => rows,
                Err(error) => {
                    self.send_error(error.context("incremental query failed"), &cancel)
                        .await;
                    continue;
                }
            };
            if rows.is_empty() {
                continue;
            }

            let mut processed = 0usize;
            for row in rows {
                last_id = row.id;
                if !self.emit(&row, &cancel).await {
                    return;
                }
                processed += 1;
            }
            debug!(count = processed, last_id, "incremental batch processed");
        }
    }

    /// Convert and forward one row. Returns false when cancelled.
    async fn emit(&self, row: &SwapRow, cancel: &CancellationToken) -> bool {
        let Some(trade) = convert_swap(row) else {
            self.dropped_records.fetch_add(1, Ordering::Relaxed);
            return true;
        };
        tokio::select! {
            result = self.trade_tx.send(trade) => result.is_ok(),
            _ = cancel.cancelled() => false,
        }
    }

    async fn send_error(&self, error: anyhow::Error, cancel: &CancellationToken) {
        warn!(error = %error, "database source error");
        tokio::select! {
            result = self.error_tx.send(error) => {
                if result.is_err() {
                    debug!("source error channel closed");
                }
            }
            _ = cancel.cancelled() => {}
        }
    }
}

/// Cancellation-aware sleep; false when cancelled.
async fn pause(millis: u64, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = time::sleep(std::time::Duration::from_millis(millis)) => true,
        _ = cancel.cancelled() => false,
    }
}
