use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One DEX swap, identified by `(signature, instruction_index)`.
///
/// `id` is the synthetic `"{signature}_{instruction_index}"` string the
/// source assigns during conversion. Within one source stream, trades
/// arrive in strictly increasing log-id order, which also makes
/// `block_time` non-decreasing per token in the normal case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub signature: String,
    pub instruction_index: String,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    pub user_wallet: String,
    pub token_address: String,
    pub amount_usd: Decimal,
    pub price_usd: Decimal,
    pub action: TradeAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    PriceSpike,
    VolumeSpike,
    LargeTransaction,
    NewToken,
    WhaleActivity,
    CompositeSignal,
}

impl SignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriceSpike => "price_spike",
            Self::VolumeSpike => "volume_spike",
            Self::LargeTransaction => "large_transaction",
            Self::NewToken => "new_token",
            Self::WhaleActivity => "whale_activity",
            Self::CompositeSignal => "composite_signal",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detection event emitted when a detector's condition tree fires.
///
/// `data` carries free-form context filled in by the detector and later
/// extended by the gate's enrichment step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub signal_type: SignalType,
    pub token_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_symbol: String,
    pub severity: u8,
    pub confidence: f64,
    pub message: String,
    pub data: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub source_trade: Trade,
}

/// Big-transaction partition of a 30-second tail scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigTxStats {
    pub total: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub unique_wallets: usize,
}

/// Immutable snapshot of a token window (full width or a tail suffix).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStats {
    pub address: String,
    pub tx_count: usize,
    pub unique_wallets: usize,
    pub volume_usd: Decimal,
    pub start_price: Decimal,
    pub current_price: Decimal,
    pub price_change_percent: Decimal,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_tx: Option<BigTxStats>,
}

impl TokenStats {
    pub fn empty(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tx_count: 0,
            unique_wallets: 0,
            volume_usd: Decimal::ZERO,
            start_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            price_change_percent: Decimal::ZERO,
            last_update: DateTime::<Utc>::MIN_UTC,
            big_tx: None,
        }
    }
}

/// 16 lowercase hex chars: 8 random bytes, hex-encoded.
pub fn new_signal_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// Percent change from `start` to `current`, zero when `start` is zero.
pub fn price_change_percent(start: Decimal, current: Decimal) -> Decimal {
    if start.is_zero() {
        return Decimal::ZERO;
    }
    (current - start) / start * Decimal::ONE_HUNDRED
}
