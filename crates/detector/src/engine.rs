use chrono::Duration;
use memesignal_core_types::{Signal, Trade};
use memesignal_config::DetectorConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::detector::Detector;
use crate::worker::{Worker, WorkerConfig, WorkerState};

/// Stable CRC32-IEEE shard routing: the same token maps to the same
/// worker across runs and restarts.
pub fn shard_for_token(token_address: &str, worker_count: usize) -> usize {
    crc32fast::hash(token_address.as_bytes()) as usize % worker_count.max(1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSnapshot {
    pub tracked_tokens: usize,
    pub cached_signals: usize,
}

struct WorkerHandle {
    input_tx: mpsc::Sender<Trade>,
    state: Arc<RwLock<WorkerState>>,
    join: JoinHandle<()>,
}

/// Fixed pool of shard workers plus the shared signal channel. All
/// trades for one token land on one worker for the engine's lifetime.
pub struct DetectorEngine {
    workers: Vec<WorkerHandle>,
    dropped_trades: Arc<AtomicU64>,
}

impl DetectorEngine {
    /// Spawn the worker pool. The returned receiver is the engine output;
    /// it closes once every worker has exited after cancellation.
    pub fn start(
        config: &DetectorConfig,
        detectors: Vec<Arc<dyn Detector>>,
        cancel: &CancellationToken,
    ) -> (Self, mpsc::Receiver<Signal>) {
        let worker_count = config.worker_count.max(1);
        let (signal_tx, signal_rx) = mpsc::channel(config.signal_queue_capacity.max(1));
        let detectors: Arc<[Arc<dyn Detector>]> = detectors.into();
        let worker_config = WorkerConfig {
            window_width: Duration::seconds(config.window_seconds.max(1)),
            signal_cooldown: Duration::minutes(config.signal_cooldown_minutes.max(1)),
        };

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (input_tx, input_rx) = mpsc::channel(config.input_queue_capacity.max(1));
            let worker = Worker::new(
                id,
                worker_config,
                Arc::clone(&detectors),
                signal_tx.clone(),
            );
            let state = worker.state();
            let join = tokio::spawn(worker.run(input_rx, cancel.child_token()));
            workers.push(WorkerHandle {
                input_tx,
                state,
                join,
            });
        }
        drop(signal_tx);

        info!(
            worker_count,
            window_seconds = config.window_seconds,
            detector_count = detectors.len(),
            "detector engine started"
        );

        (
            Self {
                workers,
                dropped_trades: Arc::new(AtomicU64::new(0)),
            },
            signal_rx,
        )
    }

    /// Route a trade to its shard without blocking. A full shard queue
    /// drops the trade; liveness of the source wins over completeness.
    pub fn dispatch(&self, trade: Trade) {
        if trade.token_address.is_empty() {
            return;
        }
        let shard = shard_for_token(&trade.token_address, self.workers.len());
        match self.workers[shard].input_tx.try_send(trade) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(trade)) => {
                self.dropped_trades.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker_id = shard,
                    token = %trade.token_address,
                    "worker queue full, dropping trade"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(worker_id = shard, "worker queue closed");
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn dropped_trades(&self) -> u64 {
        self.dropped_trades.load(Ordering::Relaxed)
    }

    pub fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .iter()
            .map(|handle| {
                // A poisoned worker lock yields an empty snapshot rather
                // than taking the stats caller down with it.
                if let Ok(state) = handle.state.read() {
                    WorkerSnapshot {
                        tracked_tokens: state.windows.len(),
                        cached_signals: state.sent_signals.len(),
                    }
                } else {
                    WorkerSnapshot::default()
                }
            })
            .collect()
    }

    /// Close worker inputs and wait for every worker to exit. Run after
    /// cancelling the token passed to `start`; the signal receiver
    /// observes the close once the last worker drops its sender.
    pub async fn shutdown(self) {
        for handle in self.workers {
            drop(handle.input_tx);
            if let Err(error) = handle.join.await {
                warn!(error = %error, "worker task join failed");
            }
        }
        info!("detector engine stopped");
    }
}
