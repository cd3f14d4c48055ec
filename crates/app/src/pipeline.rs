use anyhow::{Context, Result};
use chrono::Utc;
use memesignal_config::AppConfig;
use memesignal_core_types::Signal;
use memesignal_detector::{DetectorEngine, DetectorRegistry};
use memesignal_gate::{GateOutcome, SignalGate};
use memesignal_ingestion::{DatabaseSource, SourceManager};
use memesignal_publisher::{FeishuPublisher, LogPublisher, PublisherManager};
use memesignal_storage::SqliteStore;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(60);
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const DRAIN_SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

/// Wire source manager -> detector engine -> gate -> publishers and run
/// until SIGINT/SIGTERM. Shutdown: cancel the root token, stop sources,
/// drain and join workers, let the gate drain the closed engine output,
/// then close publishers.
pub async fn run(config: AppConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    let mut source_manager = SourceManager::new();
    source_manager.add_source(Box::new(DatabaseSource::new(
        &config.sqlite.path,
        config.source.clone(),
    )));

    let detectors = DetectorRegistry::with_defaults()
        .create_all()
        .context("failed to build default detectors")?;
    let (engine, signal_rx) = DetectorEngine::start(&config.detector, detectors, &cancel);

    let mut publishers =
        PublisherManager::new(Duration::from_millis(config.publisher.publish_timeout_ms.max(1)));
    publishers.add_publisher(Box::new(LogPublisher));
    if !config.publisher.feishu_webhook_url.is_empty() {
        let feishu = FeishuPublisher::new(
            config.publisher.feishu_webhook_url.clone(),
            Duration::from_millis(config.publisher.publish_timeout_ms.max(1)),
        )
        .context("failed to build feishu publisher")?;
        publishers.add_publisher(Box::new(feishu));
    }

    let gate_store = SqliteStore::open(Path::new(&config.sqlite.path))
        .context("failed to open sqlite store for the gate")?;
    let gate = SignalGate::new(config.gate.clone(), gate_store, publishers);

    let (mut trade_rx, mut error_rx) = source_manager
        .start(&cancel)
        .await
        .context("failed to start sources")?;

    let bootstrap_done = Arc::new(AtomicBool::new(false));
    let drain = tokio::spawn(signal_drain(
        gate,
        signal_rx,
        Arc::clone(&bootstrap_done),
    ));

    let mut stats_interval = time::interval(STATS_REPORT_INTERVAL);
    stats_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("pipeline running");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            maybe_trade = trade_rx.recv() => {
                let Some(trade) = maybe_trade else {
                    warn!("trade stream closed");
                    break;
                };
                if !bootstrap_done.load(Ordering::Acquire) && source_manager.is_initial_loaded() {
                    bootstrap_done.store(true, Ordering::Release);
                    info!("initial data loaded, signal publishing enabled");
                }
                engine.dispatch(trade);
            }
            maybe_error = error_rx.recv() => {
                if let Some(error) = maybe_error {
                    warn!(error = %error, "source error");
                }
            }
            _ = stats_interval.tick() => {
                report_engine_stats(&engine);
            }
        }
    }

    cancel.cancel();
    engine.shutdown().await;
    if let Err(error) = drain.await {
        warn!(error = %error, "signal drain join failed");
    }
    info!("pipeline stopped");
    Ok(())
}

/// Engine output -> gate -> publishers. Exits when the engine output
/// closes (after every worker has stopped), then closes the publishers,
/// so in-flight signals always drain before shutdown completes.
async fn signal_drain(
    mut gate: SignalGate,
    mut signal_rx: mpsc::Receiver<Signal>,
    bootstrap_done: Arc<AtomicBool>,
) {
    let caches = gate.caches();
    let mut outcome_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut summary_interval = time::interval(DRAIN_SUMMARY_INTERVAL);
    summary_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cleanup_interval = time::interval(CACHE_CLEANUP_INTERVAL);
    cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_signal = signal_rx.recv() => {
                let Some(signal) = maybe_signal else {
                    break;
                };
                if !bootstrap_done.load(Ordering::Acquire) {
                    debug!(
                        signal_type = %signal.signal_type,
                        token = %signal.token_address,
                        "initial data still loading, signal skipped"
                    );
                    continue;
                }
                let outcome = gate.process(signal, Utc::now()).await;
                *outcome_counts.entry(outcome.as_str()).or_insert(0) += 1;
                if let GateOutcome::Published { delivered } = outcome {
                    debug!(delivered, "signal fan-out complete");
                }
            }
            _ = summary_interval.tick() => {
                if !outcome_counts.is_empty() {
                    info!(outcomes = ?outcome_counts, "gate outcome summary");
                    outcome_counts.clear();
                }
            }
            _ = cleanup_interval.tick() => {
                let (sent, skipped) = caches.cleanup(
                    Utc::now(),
                    gate.send_cooldown(),
                    gate.skip_cooldown(),
                );
                debug!(sent_cached = sent, skipped_cached = skipped, "gate caches cleaned");
            }
        }
    }

    gate.close().await;
    if !outcome_counts.is_empty() {
        info!(outcomes = ?outcome_counts, "final gate outcome summary");
    }
    debug!("signal drain stopped");
}

fn report_engine_stats(engine: &DetectorEngine) {
    let snapshots = engine.worker_snapshots();
    let total_tokens: usize = snapshots.iter().map(|s| s.tracked_tokens).sum();
    let total_cached: usize = snapshots.iter().map(|s| s.cached_signals).sum();
    info!(
        workers = snapshots.len(),
        tokens_tracked = total_tokens,
        cached_signals = total_cached,
        dropped_trades = engine.dropped_trades(),
        "detector engine stats"
    );

    if total_tokens > 0 {
        if let Some((busiest, snapshot)) = snapshots
            .iter()
            .enumerate()
            .max_by_key(|(_, s)| s.tracked_tokens)
        {
            info!(
                worker_id = busiest,
                tokens_tracked = snapshot.tracked_tokens,
                load_percent = snapshot.tracked_tokens as f64 / total_tokens as f64 * 100.0,
                "busiest worker"
            );
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
