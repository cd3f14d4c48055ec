use chrono::{DateTime, Duration, Utc};
use memesignal_core_types::{Signal, SignalType, Trade};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::detector::Detector;
use crate::window::TokenWindow;

const MAINTENANCE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerConfig {
    pub window_width: Duration,
    pub signal_cooldown: Duration,
}

/// Everything a worker mutates, behind one lock: the worker takes it for
/// writes, stats snapshots take it for reads.
#[derive(Default)]
pub(crate) struct WorkerState {
    pub windows: HashMap<String, TokenWindow>,
    pub sent_signals: HashMap<(String, SignalType), DateTime<Utc>>,
}

pub(crate) struct Worker {
    id: usize,
    config: WorkerConfig,
    state: Arc<RwLock<WorkerState>>,
    detectors: Arc<[Arc<dyn Detector>]>,
    signal_tx: mpsc::Sender<Signal>,
}

impl Worker {
    pub fn new(
        id: usize,
        config: WorkerConfig,
        detectors: Arc<[Arc<dyn Detector>]>,
        signal_tx: mpsc::Sender<Signal>,
    ) -> Self {
        Self {
            id,
            config,
            state: Arc::new(RwLock::new(WorkerState::default())),
            detectors,
            signal_tx,
        }
    }

    pub fn state(&self) -> Arc<RwLock<WorkerState>> {
        Arc::clone(&self.state)
    }

    pub async fn run(self, mut input: mpsc::Receiver<Trade>, cancel: CancellationToken) {
        let mut maintenance = time::interval(std::time::Duration::from_secs(
            MAINTENANCE_INTERVAL_SECS,
        ));
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker_id = self.id, "worker cancelled");
                    return;
                }
                maybe_trade = input.recv() => {
                    let Some(trade) = maybe_trade else {
                        debug!(worker_id = self.id, "worker input closed");
                        return;
                    };
                    let ready = self.process_trade(trade, Utc::now());
                    for signal in ready {
                        self.offer_signal(signal);
                    }
                }
                _ = maintenance.tick() => {
                    self.sweep(Utc::now());
                }
            }
        }
    }

    /// Append the trade to its window, run every detector, and apply the
    /// local send-cooldown. Returns the signals that cleared dedup.
    pub fn process_trade(&self, trade: Trade, now: DateTime<Utc>) -> Vec<Signal> {
        if trade.token_address.is_empty() {
            return Vec::new();
        }

        let Ok(mut state) = self.state.write() else {
            warn!(worker_id = self.id, "worker state lock poisoned, dropping trade");
            return Vec::new();
        };
        let state = &mut *state;
        let window = state
            .windows
            .entry(trade.token_address.clone())
            .or_insert_with(|| TokenWindow::new(trade.token_address.clone(), self.config.window_width));
        window.add(trade.clone());

        let stats = window.stats();
        if stats.tx_count > 0 && stats.tx_count % 100 == 0 {
            debug!(
                worker_id = self.id,
                token = %stats.address,
                tx_count_5m = stats.tx_count,
                unique_wallets = stats.unique_wallets,
                price_change = %stats.price_change_percent,
                volume_5m = %stats.volume_usd,
                "token window stats"
            );
        }

        let mut fired = Vec::new();
        for detector in self.detectors.iter() {
            if let Some(signal) = detector.detect(&stats, &trade, window) {
                fired.push(signal);
            }
        }
        if fired.is_empty() {
            return fired;
        }

        let mut ready = Vec::new();
        for signal in fired {
            let key = (signal.token_address.clone(), signal.signal_type);
            let in_cooldown = state
                .sent_signals
                .get(&key)
                .is_some_and(|last| now - *last < self.config.signal_cooldown);
            if in_cooldown {
                debug!(
                    worker_id = self.id,
                    signal_type = %signal.signal_type,
                    token = %signal.token_address,
                    "signal inside cooldown, skipped"
                );
                continue;
            }
            state.sent_signals.insert(key, now);
            ready.push(signal);
        }
        ready
    }

    /// Non-blocking offer into the shared signal channel; back-pressure
    /// from the sink must never stall window updates.
    fn offer_signal(&self, signal: Signal) {
        match self.signal_tx.try_send(signal) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(signal)) => {
                warn!(
                    worker_id = self.id,
                    signal_type = %signal.signal_type,
                    token = %signal.token_address,
                    "signal channel full, dropping signal"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(worker_id = self.id, "signal channel closed");
            }
        }
    }

    /// Drop idle windows and stale dedup entries.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let Ok(mut state) = self.state.write() else {
            warn!(worker_id = self.id, "worker state lock poisoned, skipping sweep");
            return;
        };
        let window_cutoff = now - self.config.window_width;
        state
            .windows
            .retain(|_, window| window.last_update() >= window_cutoff);
        let cooldown = self.config.signal_cooldown;
        state
            .sent_signals
            .retain(|_, sent_at| now - *sent_at <= cooldown);

        debug!(
            worker_id = self.id,
            active_tokens = state.windows.len(),
            cached_signals = state.sent_signals.len(),
            "worker sweep complete"
        );
    }
}
