use chrono::{DateTime, Duration, Utc};
use memesignal_config::GateConfig;
use memesignal_core_types::{Signal, SignalType};
use memesignal_publisher::PublisherManager;
use memesignal_storage::SqliteStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

type CacheKey = (String, SignalType);

/// Send and skip cooldown caches, shared with the periodic cleaner.
#[derive(Default)]
pub struct GateCaches {
    sent: RwLock<HashMap<CacheKey, DateTime<Utc>>>,
    skipped: RwLock<HashMap<CacheKey, DateTime<Utc>>>,
}

impl GateCaches {
    // A poisoned cache lock degrades to a miss or a skipped write; the
    // gate keeps processing signals either way.
    fn hit_within(
        cache: &RwLock<HashMap<CacheKey, DateTime<Utc>>>,
        key: &CacheKey,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool {
        let Ok(guard) = cache.read() else {
            return false;
        };
        guard.get(key).is_some_and(|at| now - *at < cooldown)
    }

    fn sent_within(&self, key: &CacheKey, now: DateTime<Utc>, cooldown: Duration) -> bool {
        Self::hit_within(&self.sent, key, now, cooldown)
    }

    fn skipped_within(&self, key: &CacheKey, now: DateTime<Utc>, cooldown: Duration) -> bool {
        Self::hit_within(&self.skipped, key, now, cooldown)
    }

    fn mark_sent(&self, key: CacheKey, now: DateTime<Utc>) {
        if let Ok(mut sent) = self.sent.write() {
            sent.insert(key, now);
        }
    }

    fn mark_skipped(&self, key: CacheKey, now: DateTime<Utc>) {
        if let Ok(mut skipped) = self.skipped.write() {
            skipped.insert(key, now);
        }
    }

    /// Evict entries older than their cooldown. Returns the remaining
    /// (sent, skipped) cache sizes.
    pub fn cleanup(
        &self,
        now: DateTime<Utc>,
        send_cooldown: Duration,
        skip_cooldown: Duration,
    ) -> (usize, usize) {
        let mut sent_len = 0;
        if let Ok(mut sent) = self.sent.write() {
            sent.retain(|_, at| now - *at <= send_cooldown);
            sent_len = sent.len();
        }

        let mut skipped_len = 0;
        if let Ok(mut skipped) = self.skipped.write() {
            skipped.retain(|_, at| now - *at <= skip_cooldown);
            skipped_len = skipped.len();
        }
        (sent_len, skipped_len)
    }
}

/// Terminal state of one signal's trip through the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateOutcome {
    Published { delivered: usize },
    SuppressedSkipCooldown,
    SuppressedSendCooldown,
    BundleDisqualified { ratio: f64 },
    PhishingDisqualified { ratio: f64 },
    LowHolderCount { holders: u64 },
    NoPublisherSucceeded,
}

impl GateOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::SuppressedSkipCooldown => "skip_cooldown",
            Self::SuppressedSendCooldown => "send_cooldown",
            Self::BundleDisqualified { .. } => "bundle_ratio",
            Self::PhishingDisqualified { .. } => "phishing_ratio",
            Self::LowHolderCount { .. } => "holder_count",
            Self::NoPublisherSucceeded => "publish_failed",
        }
    }
}

/// Dedup, disqualification, enrichment and fan-out between the engine
/// output and the publishers. Lookup failures degrade to missing
/// enrichment; only explicit disqualification drops a signal.
pub struct SignalGate {
    config: GateConfig,
    store: SqliteStore,
    caches: Arc<GateCaches>,
    publishers: PublisherManager,
}

impl SignalGate {
    pub fn new(config: GateConfig, store: SqliteStore, publishers: PublisherManager) -> Self {
        Self {
            config,
            store,
            caches: Arc::new(GateCaches::default()),
            publishers,
        }
    }

    pub fn caches(&self) -> Arc<GateCaches> {
        Arc::clone(&self.caches)
    }

    pub fn send_cooldown(&self) -> Duration {
        Duration::minutes(self.config.send_cooldown_minutes.max(1))
    }

    pub fn skip_cooldown(&self) -> Duration {
        Duration::minutes(self.config.skip_cooldown_minutes.max(1))
    }

    pub async fn close(&mut self) {
        self.publishers.close_all().await;
    }

    // &mut keeps the future Send: the sqlite handle is not Sync, so the
    // drain task must hold the gate exclusively across await points.
    pub async fn process(&mut self, mut signal: Signal, now: DateTime<Utc>) -> GateOutcome {
        let key = (signal.token_address.clone(), signal.signal_type);

        if self.caches.skipped_within(&key, now, self.skip_cooldown()) {
            debug!(
                token = %key.0,
                signal_type = %key.1,
                "signal token inside skip cooldown"
            );
            return GateOutcome::SuppressedSkipCooldown;
        }
        if self.caches.sent_within(&key, now, self.send_cooldown()) {
            debug!(
                token = %key.0,
                signal_type = %key.1,
                "signal inside send cooldown"
            );
            return GateOutcome::SuppressedSendCooldown;
        }

        if let Some(outcome) = self.check_bundle_ratio(&mut signal, &key, now) {
            return outcome;
        }
        if let Some(outcome) = self.check_phishing_and_enrich(&mut signal, &key, now) {
            return outcome;
        }
        if let Some(outcome) = self.check_holder_floor(&mut signal, &key) {
            return outcome;
        }

        let delivered = self.publishers.publish_all(&signal).await;
        if delivered == 0 {
            warn!(
                signal_id = %signal.id,
                token = %key.0,
                "no publisher accepted the signal"
            );
            return GateOutcome::NoPublisherSucceeded;
        }
        self.caches.mark_sent(key, now);
        GateOutcome::Published { delivered }
    }

    fn check_bundle_ratio(
        &self,
        signal: &mut Signal,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Option<GateOutcome> {
        match self.store.bundle_ratio(&key.0) {
            Ok(ratio) if ratio > self.config.bundle_ratio_max => {
                self.caches.mark_skipped(key.clone(), now);
                info!(
                    token = %key.0,
                    bundle_ratio = ratio,
                    threshold = self.config.bundle_ratio_max,
                    "signal disqualified by bundle ratio"
                );
                Some(GateOutcome::BundleDisqualified { ratio })
            }
            Ok(ratio) => {
                signal.data.insert("bundle_ratio".to_string(), json!(ratio));
                None
            }
            Err(error) => {
                warn!(token = %key.0, error = %error, "bundle ratio lookup failed");
                None
            }
        }
    }

    /// Token metadata, holder list, phishing share and the top-10 share.
    /// Without metadata the phishing check cannot run and the signal
    /// proceeds unenriched.
    fn check_phishing_and_enrich(
        &self,
        signal: &mut Signal,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Option<GateOutcome> {
        let info = match self.store.token_info(&key.0) {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!(token = %key.0, "token metadata missing, skipping phishing check");
                return None;
            }
            Err(error) => {
                warn!(token = %key.0, error = %error, "token metadata lookup failed");
                return None;
            }
        };

        signal.token_symbol = info.symbol.clone();
        signal
            .data
            .insert("token_symbol".to_string(), json!(info.symbol));
        signal
            .data
            .insert("token_supply".to_string(), json!(info.supply.to_string()));
        signal
            .data
            .entry("current_price".to_string())
            .or_insert_with(|| json!(info.current_price.to_string()));

        let holder_wallets = match self.store.holders(&key.0) {
            Ok(holders) => holders
                .into_iter()
                .map(|holder| holder.wallet_address)
                .collect::<Vec<_>>(),
            Err(error) => {
                warn!(token = %key.0, error = %error, "holder list lookup failed");
                return None;
            }
        };

        match self
            .store
            .phishing_ratio(&key.0, &holder_wallets, info.supply)
        {
            Ok(ratio) if ratio > self.config.phishing_ratio_max => {
                self.caches.mark_skipped(key.clone(), now);
                info!(
                    token = %key.0,
                    phishing_ratio = ratio,
                    threshold = self.config.phishing_ratio_max,
                    "signal disqualified by phishing ratio"
                );
                return Some(GateOutcome::PhishingDisqualified { ratio });
            }
            Ok(ratio) => {
                signal
                    .data
                    .insert("phishing_ratio".to_string(), json!(ratio));
            }
            Err(error) => {
                warn!(token = %key.0, error = %error, "phishing ratio lookup failed");
            }
        }

        match self.store.top10_holders_ratio(&key.0, info.supply) {
            Ok(ratio) => {
                signal
                    .data
                    .insert("top10_holders_ratio".to_string(), json!(ratio));
            }
            Err(error) => {
                warn!(token = %key.0, error = %error, "top10 holder lookup failed");
            }
        }
        None
    }

    /// Thin holder bases drop the signal without touching the skip
    /// cache; the token is re-evaluated as soon as it qualifies again.
    fn check_holder_floor(&self, signal: &mut Signal, key: &CacheKey) -> Option<GateOutcome> {
        match self.store.holder_count(&key.0) {
            Ok(holders) if holders < self.config.min_holder_count => {
                info!(
                    token = %key.0,
                    holders,
                    floor = self.config.min_holder_count,
                    "signal dropped below holder floor"
                );
                Some(GateOutcome::LowHolderCount { holders })
            }
            Ok(holders) => {
                signal.data.insert("holder_count".to_string(), json!(holders));
                None
            }
            Err(error) => {
                warn!(token = %key.0, error = %error, "holder count lookup failed");
                None
            }
        }
    }
}
