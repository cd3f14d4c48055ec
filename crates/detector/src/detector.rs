use anyhow::{anyhow, Result};
use chrono::Utc;
use memesignal_core_types::{new_signal_id, Signal, SignalType, TokenStats, Trade};
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::condition::{
    BigTransactionCondition, CompareOp, Condition, ConditionBuilder, EvaluationContext,
    PriceChangeCondition, TimeFrame, TxCountCondition, UniqueWalletsCondition,
    WhaleTransactionCondition,
};
use crate::window::TokenWindow;

/// A detector inspects every trade of its shard and emits at most one
/// signal per trade.
pub trait Detector: Send + Sync {
    fn kind(&self) -> &str;
    fn detect(&self, stats_5m: &TokenStats, trade: &Trade, window: &TokenWindow)
        -> Option<Signal>;
}

/// Detector driven by a condition tree; fires a signal of a fixed type,
/// severity and confidence whenever the tree evaluates true.
pub struct ConditionDetector {
    name: String,
    description: String,
    kind: String,
    signal_type: SignalType,
    severity: u8,
    confidence: f64,
    condition: Box<dyn Condition>,
}

impl Detector for ConditionDetector {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn detect(
        &self,
        stats_5m: &TokenStats,
        trade: &Trade,
        window: &TokenWindow,
    ) -> Option<Signal> {
        let stats_30s = window.last_30s_stats(None);
        let ctx = EvaluationContext {
            stats_5m,
            stats_30s: &stats_30s,
            stats_1m: None,
            trade,
            window,
        };
        if !self.condition.evaluate(&ctx) {
            return None;
        }

        let now = Utc::now();
        let mut data = BTreeMap::new();
        data.insert("detector_name".to_string(), json!(self.name));
        data.insert("detector_kind".to_string(), json!(self.kind));
        data.insert("condition_name".to_string(), json!(self.condition.name()));
        data.insert(
            "condition_desc".to_string(),
            json!(self.condition.description()),
        );
        data.insert(
            "trigger_time".to_string(),
            json!(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        data.insert("trigger_tx_sig".to_string(), json!(trade.signature));
        data.insert(
            "current_price".to_string(),
            json!(stats_5m.current_price.trunc_with_scale(8).normalize().to_string()),
        );
        data.insert(
            "price_change_5m".to_string(),
            json!(stats_5m
                .price_change_percent
                .trunc_with_scale(2)
                .normalize()
                .to_string()),
        );
        data.insert("unique_wallets".to_string(), json!(stats_5m.unique_wallets));
        data.insert("tx_count_5m".to_string(), json!(stats_5m.tx_count));
        data.insert(
            "volume_5m".to_string(),
            json!(stats_5m.volume_usd.trunc_with_scale(2).normalize().to_string()),
        );

        let signal = Signal {
            id: new_signal_id(),
            signal_type: self.signal_type,
            token_address: stats_5m.address.clone(),
            token_symbol: String::new(),
            severity: self.severity,
            confidence: self.confidence,
            message: format!("detector [{}] fired: {}", self.name, self.description),
            data,
            timestamp: now,
            source_trade: trade.clone(),
        };

        info!(
            detector = %self.name,
            condition = %self.condition.name(),
            token = %stats_5m.address,
            signal_type = %signal.signal_type,
            "detector condition met"
        );
        Some(signal)
    }
}

pub struct DetectorBuilder {
    name: String,
    description: String,
    kind: String,
    signal_type: SignalType,
    severity: u8,
    confidence: f64,
    condition: Option<Box<dyn Condition>>,
}

impl DetectorBuilder {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            kind: String::new(),
            signal_type: SignalType::LargeTransaction,
            severity: 5,
            confidence: 0.8,
            condition: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn signal_type(mut self, signal_type: SignalType) -> Self {
        self.signal_type = signal_type;
        self
    }

    pub fn severity(mut self, severity: u8) -> Self {
        self.severity = severity;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn condition(mut self, condition: Box<dyn Condition>) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn build(self) -> Result<Arc<dyn Detector>> {
        let condition = self
            .condition
            .ok_or_else(|| anyhow!("detector '{}' built without a condition", self.name))?;
        Ok(Arc::new(ConditionDetector {
            name: self.name,
            description: self.description,
            kind: self.kind,
            signal_type: self.signal_type,
            severity: self.severity,
            confidence: self.confidence,
            condition,
        }))
    }
}

impl Default for DetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type DetectorFactory = Box<dyn Fn() -> Result<Arc<dyn Detector>> + Send + Sync>;

/// Name-keyed detector factories. `with_defaults` registers the two
/// built-in detectors.
pub struct DetectorRegistry {
    factories: HashMap<String, DetectorFactory>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("meme_signal", meme_signal_detector);
        registry.register("whale_activity", whale_activity_detector);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Detector>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Detector>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("detector '{name}' is not registered"))?;
        factory()
    }

    pub fn create_all(&self) -> Result<Vec<Arc<dyn Detector>>> {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        names.iter().map(|name| self.create(name)).collect()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite meme momentum detector: sustained 5m rally, fresh 30s leg,
/// dense flow from many wallets, and concentrated big-trade buying.
pub fn meme_signal_detector() -> Result<Arc<dyn Detector>> {
    let price_change_5m = PriceChangeCondition::new(
        "price_change_5m_25pct",
        "5m price change at least 25%",
        TimeFrame::FiveMinutes,
        CompareOp::Gte,
        dec!(25.0),
    );
    let price_change_30s = PriceChangeCondition::new(
        "price_change_30s_15pct",
        "30s price change at least 15%",
        TimeFrame::ThirtySeconds,
        CompareOp::Gte,
        dec!(15.0),
    );
    let tx_count = TxCountCondition::new(
        "tx_count_5m_300plus",
        "more than 300 trades in 5m",
        TimeFrame::FiveMinutes,
        CompareOp::Gt,
        300,
    );
    let unique_wallets = UniqueWalletsCondition::new(
        "unique_wallets_5m_100plus",
        "more than 100 distinct wallets in 5m",
        TimeFrame::FiveMinutes,
        CompareOp::Gt,
        100,
    );
    let big_transactions = BigTransactionCondition::new(
        "big_tx_30s_analysis",
        "30s trades over 600 USD: at least 8 users, buy/sell ratio at least 1.5",
        dec!(600.0),
        8,
        1.5,
    );

    let combined = ConditionBuilder::new()
        .name("meme_signal_composite")
        .description("composite meme momentum conditions")
        .and(Box::new(price_change_5m))
        .and(Box::new(price_change_30s))
        .and(Box::new(tx_count))
        .and(Box::new(unique_wallets))
        .and(Box::new(big_transactions))
        .build();

    DetectorBuilder::new()
        .name("meme_signal_detector")
        .description("meme token momentum pattern")
        .kind("meme_signal")
        .signal_type(SignalType::CompositeSignal)
        .severity(8)
        .confidence(0.95)
        .condition(combined)
        .build()
}

/// Whale entering a quiet market: under 40k USD of 5m volume, under 80
/// trades, no prior single trade above 5k, and a trigger above 10k.
pub fn whale_activity_detector() -> Result<Arc<dyn Detector>> {
    let whale = WhaleTransactionCondition::new(
        "sudden_whale_activity",
        "large trade landing in a quiet market",
        dec!(40000.0),
        dec!(5000.0),
        dec!(10000.0),
        80,
    );

    DetectorBuilder::new()
        .name("whale_activity_detector")
        .description("sudden whale trade in a quiet market")
        .kind("whale_activity")
        .signal_type(SignalType::WhaleActivity)
        .severity(7)
        .confidence(0.9)
        .condition(Box::new(whale))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_support::trade_at;
    use chrono::Duration;
    use memesignal_core_types::TradeAction;
    use rust_decimal::Decimal;

    /// Seed scenario: 400 trades over 120 wallets ramping +30% in 5m,
    /// an +18% final 30 seconds, and 10 big trades (9 buys / 1 sell
    /// across 9 wallets) inside the tail.
    fn meme_ramp_window() -> (TokenWindow, Trade) {
        let mut window = TokenWindow::new("TokenAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", Duration::minutes(5));

        // 389 small trades over the first 260 seconds: 1.00 -> 1.102.
        for i in 0..389 {
            let price = dec!(1.00) + Decimal::from(i as i64) * dec!(0.1) / dec!(380);
            let price = price.min(dec!(1.102));
            window.add(trade_at(
                (i as i64) * 260 / 389,
                &format!("w-{}", i % 111),
                dec!(150),
                price,
                if i % 7 == 0 { TradeAction::Sell } else { TradeAction::Buy },
            ));
        }

        // Final 30 seconds: ten big trades pushing 1.102 -> 1.30 (+18%
        // over the tail, +30% over the window).
        for i in 0..9 {
            let price = dec!(1.102) + Decimal::from(i as i64 + 1) * dec!(0.02);
            window.add(trade_at(
                272 + i as i64 * 3,
                &format!("big-{}", i % 8),
                dec!(900),
                price,
                if i == 4 { TradeAction::Sell } else { TradeAction::Buy },
            ));
        }
        let last = trade_at(299, "big-closer", dec!(900), dec!(1.30), TradeAction::Buy);
        window.add(last.clone());
        (window, last)
    }

    #[test]
    fn meme_detector_fires_on_the_composite_ramp() {
        let detector = meme_signal_detector().expect("build detector");
        let (window, last) = meme_ramp_window();
        let stats = window.stats();
        assert_eq!(stats.tx_count, 399);
        assert_eq!(stats.unique_wallets, 120);

        let signal = detector
            .detect(&stats, &last, &window)
            .expect("composite signal fires");
        assert_eq!(signal.signal_type, SignalType::CompositeSignal);
        assert_eq!(signal.severity, 8);
        assert!((signal.confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(signal.data["price_change_5m"], json!("30"));
        assert_eq!(signal.data["unique_wallets"], json!(stats.unique_wallets));
        assert_eq!(signal.data["trigger_tx_sig"], json!(last.signature));
        assert_eq!(signal.data["current_price"], json!("1.3"));
    }

    #[test]
    fn meme_detector_stays_quiet_without_the_tail_leg() {
        let detector = meme_signal_detector().expect("build detector");
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        // Plenty of flow but a flat tail: the 30s leg never develops.
        for i in 0..400 {
            window.add(trade_at(
                (i as i64) * 299 / 400,
                &format!("w-{}", i % 120),
                dec!(700),
                dec!(1.30),
                TradeAction::Buy,
            ));
        }
        let last = trade_at(299, "closer", dec!(700), dec!(1.30), TradeAction::Buy);
        window.add(last.clone());
        let stats = window.stats();
        assert!(detector.detect(&stats, &last, &window).is_none());
    }

    #[test]
    fn whale_detector_reports_trigger_price() {
        let detector = whale_activity_detector().expect("build detector");
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        let amounts = [1000, 500, 800, 200, 300, 400, 1500, 600, 900, 700];
        for (i, amount) in amounts.iter().enumerate() {
            let price = dec!(1.00) + Decimal::from(i as i64) * dec!(0.005);
            window.add(trade_at(
                (i as i64) * 24,
                &format!("w-{i}"),
                Decimal::from(*amount),
                price,
                TradeAction::Buy,
            ));
        }
        let whale = trade_at(250, "whale", dec!(12000), dec!(1.10), TradeAction::Buy);
        window.add(whale.clone());

        let stats = window.stats();
        let signal = detector
            .detect(&stats, &whale, &window)
            .expect("whale signal fires");
        assert_eq!(signal.signal_type, SignalType::WhaleActivity);
        assert_eq!(signal.severity, 7);
        assert!((signal.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(signal.data["current_price"], json!("1.1"));
    }

    #[test]
    fn registry_creates_and_rejects_by_name() {
        let registry = DetectorRegistry::with_defaults();
        assert_eq!(
            registry.registered_names(),
            vec!["meme_signal".to_string(), "whale_activity".to_string()]
        );
        assert!(registry.create("meme_signal").is_ok());
        assert!(registry.create("unknown").is_err());
        assert_eq!(registry.create_all().expect("create all").len(), 2);
    }
}
