use chrono::{DateTime, Duration, Utc};
use memesignal_core_types::{price_change_percent, BigTxStats, TokenStats, Trade, TradeAction};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};

const TAIL_SCAN_SECONDS: i64 = 30;

/// Bounded-time trade ring for one token with O(1) incremental
/// aggregates. Owned by exactly one worker; not internally synchronized.
///
/// Append assumes per-token non-decreasing `block_time`. A backwards
/// step is tolerated: the window still bounds on the newest trade's
/// timestamp, at the cost of aggregates being approximate within one
/// window width.
#[derive(Debug)]
pub struct TokenWindow {
    token_address: String,
    width: Duration,
    trades: VecDeque<Trade>,

    volume_usd: Decimal,
    buy_count: usize,
    sell_count: usize,
    wallet_counts: HashMap<String, u32>,
    first_price: Decimal,
    last_price: Decimal,
    last_update: DateTime<Utc>,
}

impl TokenWindow {
    pub fn new(token_address: impl Into<String>, width: Duration) -> Self {
        Self {
            token_address: token_address.into(),
            width,
            trades: VecDeque::new(),
            volume_usd: Decimal::ZERO,
            buy_count: 0,
            sell_count: 0,
            wallet_counts: HashMap::new(),
            first_price: Decimal::ZERO,
            last_price: Decimal::ZERO,
            last_update: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn token_address(&self) -> &str {
        &self.token_address
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn add(&mut self, trade: Trade) {
        self.evict_before(trade.block_time - self.width);

        self.volume_usd += trade.amount_usd;
        match trade.action {
            TradeAction::Buy => self.buy_count += 1,
            TradeAction::Sell => self.sell_count += 1,
        }
        *self
            .wallet_counts
            .entry(trade.user_wallet.clone())
            .or_insert(0) += 1;
        if self.first_price.is_zero() {
            self.first_price = trade.price_usd;
        }
        self.last_price = trade.price_usd;
        self.last_update = trade.block_time;
        self.trades.push_back(trade);
    }

    fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        let mut evicted = false;
        while let Some(front) = self.trades.front() {
            if front.block_time >= cutoff {
                break;
            }
            let expired = self.trades.pop_front().expect("checked front exists above");
            evicted = true;
            self.volume_usd -= expired.amount_usd;
            match expired.action {
                TradeAction::Buy => self.buy_count = self.buy_count.saturating_sub(1),
                TradeAction::Sell => self.sell_count = self.sell_count.saturating_sub(1),
            }
            match self.wallet_counts.get_mut(&expired.user_wallet) {
                Some(count) if *count > 1 => *count -= 1,
                _ => {
                    self.wallet_counts.remove(&expired.user_wallet);
                }
            }
        }

        if !evicted {
            return;
        }
        match self.trades.front() {
            Some(front) => self.first_price = front.price_usd,
            None => {
                self.first_price = Decimal::ZERO;
                self.last_price = Decimal::ZERO;
            }
        }
    }

    /// Full-window snapshot from the cached aggregates; O(1).
    pub fn stats(&self) -> TokenStats {
        TokenStats {
            address: self.token_address.clone(),
            tx_count: self.trades.len(),
            unique_wallets: self.wallet_counts.len(),
            volume_usd: self.volume_usd,
            start_price: self.first_price,
            current_price: self.last_price,
            price_change_percent: price_change_percent(self.first_price, self.last_price),
            last_update: self.last_update,
            big_tx: None,
        }
    }

    /// Single reverse pass over the 30-second tail ending at the newest
    /// trade. The start price is the price of the first trade older than
    /// the cutoff, falling back to the oldest in-window price. With
    /// `big_tx_threshold` set, the same pass partitions trades at or
    /// above the threshold by action and counts their distinct wallets.
    pub fn last_30s_stats(&self, big_tx_threshold: Option<Decimal>) -> TokenStats {
        let mut stats = TokenStats::empty(self.token_address.clone());
        stats.last_update = self.last_update;
        if self.trades.is_empty() {
            if big_tx_threshold.is_some() {
                stats.big_tx = Some(BigTxStats::default());
            }
            return stats;
        }

        let cutoff = self.last_update - Duration::seconds(TAIL_SCAN_SECONDS);
        let mut tail_wallets: HashSet<&str> = HashSet::new();
        let mut big = BigTxStats::default();
        let mut big_wallets: HashSet<&str> = HashSet::new();
        let mut boundary_price = Decimal::ZERO;

        for trade in self.trades.iter().rev() {
            if trade.block_time < cutoff {
                boundary_price = trade.price_usd;
                break;
            }

            stats.tx_count += 1;
            stats.volume_usd += trade.amount_usd;
            tail_wallets.insert(trade.user_wallet.as_str());

            if let Some(threshold) = big_tx_threshold {
                if trade.amount_usd >= threshold {
                    big.total += 1;
                    big_wallets.insert(trade.user_wallet.as_str());
                    match trade.action {
                        TradeAction::Buy => big.buy_count += 1,
                        TradeAction::Sell => big.sell_count += 1,
                    }
                }
            }
        }

        if boundary_price.is_zero() {
            boundary_price = self
                .trades
                .front()
                .map(|trade| trade.price_usd)
                .unwrap_or(Decimal::ZERO);
        }

        stats.unique_wallets = tail_wallets.len();
        stats.start_price = boundary_price;
        stats.current_price = self.last_price;
        stats.price_change_percent = price_change_percent(boundary_price, self.last_price);
        if big_tx_threshold.is_some() {
            big.unique_wallets = big_wallets.len();
            stats.big_tx = Some(big);
        }
        stats
    }

    pub fn max_single_amount(&self) -> Decimal {
        self.trades
            .iter()
            .map(|trade| trade.amount_usd)
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    /// Largest single amount among every trade except the most recent
    /// one. Used by quiet-state checks that must not count the trade
    /// that triggered the evaluation.
    pub fn max_single_amount_excluding_newest(&self) -> Decimal {
        let len = self.trades.len();
        if len < 2 {
            return Decimal::ZERO;
        }
        self.trades
            .iter()
            .take(len - 1)
            .map(|trade| trade.amount_usd)
            .max()
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .expect("rfc3339")
            .with_timezone(&Utc)
            + Duration::seconds(offset_secs)
    }

    fn trade(
        offset_secs: i64,
        wallet: &str,
        amount: Decimal,
        price: Decimal,
        action: TradeAction,
    ) -> Trade {
        Trade {
            id: format!("sig-{offset_secs}_{wallet}"),
            signature: format!("sig-{offset_secs}"),
            instruction_index: "0".to_string(),
            slot: offset_secs.max(0) as u64,
            block_time: ts(offset_secs),
            user_wallet: wallet.to_string(),
            token_address: "TokenAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string(),
            amount_usd: amount,
            price_usd: price,
            action,
        }
    }

    fn recompute_and_assert(window: &TokenWindow, retained: &[Trade]) {
        let stats = window.stats();
        let volume: Decimal = retained.iter().map(|t| t.amount_usd).sum();
        assert_eq!(stats.volume_usd, volume);
        assert_eq!(stats.tx_count, retained.len());

        let mut wallets: HashMap<&str, usize> = HashMap::new();
        for t in retained {
            *wallets.entry(t.user_wallet.as_str()).or_insert(0) += 1;
        }
        assert_eq!(stats.unique_wallets, wallets.len());

        if retained.is_empty() {
            assert_eq!(stats.start_price, dec!(0));
            assert_eq!(stats.current_price, dec!(0));
        } else {
            assert_eq!(stats.start_price, retained[0].price_usd);
            assert_eq!(stats.current_price, retained[retained.len() - 1].price_usd);
        }
    }

    #[test]
    fn aggregates_match_recomputation_across_eviction() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        let mut fed: Vec<Trade> = Vec::new();
        let amounts = [100, 250, 75, 900, 40, 310, 55, 120];
        for (i, amount) in amounts.iter().enumerate() {
            let t = trade(
                (i as i64) * 60,
                if i % 2 == 0 { "w-even" } else { "w-odd" },
                Decimal::from(*amount),
                dec!(1.0) + Decimal::from(i as i64) / dec!(100),
                if i % 3 == 0 { TradeAction::Sell } else { TradeAction::Buy },
            );
            fed.push(t.clone());
            window.add(t);

            let newest = fed[fed.len() - 1].block_time;
            let retained: Vec<Trade> = fed
                .iter()
                .filter(|t| t.block_time >= newest - Duration::minutes(5))
                .cloned()
                .collect();
            recompute_and_assert(&window, &retained);
        }
        // Seven minutes of feed; the oldest entries must have left.
        assert!(window.trade_count() < amounts.len());
    }

    #[test]
    fn eviction_boundary_keeps_trades_at_exact_cutoff() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        window.add(trade(0, "w1", dec!(10), dec!(1.0), TradeAction::Buy));
        window.add(trade(300, "w2", dec!(20), dec!(1.1), TradeAction::Buy));
        // t=0 sits exactly at cutoff (300 - 300) and stays.
        assert_eq!(window.trade_count(), 2);

        window.add(trade(301, "w3", dec!(30), dec!(1.2), TradeAction::Buy));
        assert_eq!(window.trade_count(), 2);
        assert_eq!(window.stats().start_price, dec!(1.1));
    }

    #[test]
    fn emptying_the_window_zeroes_both_prices() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        window.add(trade(0, "w1", dec!(10), dec!(1.0), TradeAction::Buy));
        window.add(trade(10_000, "w2", dec!(20), dec!(2.0), TradeAction::Buy));
        assert_eq!(window.trade_count(), 1);
        assert_eq!(window.stats().start_price, dec!(2.0));
        assert_eq!(window.stats().current_price, dec!(2.0));
    }

    #[test]
    fn duplicate_adds_count_twice() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        let t = trade(0, "w1", dec!(10), dec!(1.0), TradeAction::Buy);
        window.add(t.clone());
        window.add(t);
        let stats = window.stats();
        assert_eq!(stats.tx_count, 2);
        assert_eq!(stats.volume_usd, dec!(20));
        assert_eq!(stats.unique_wallets, 1);
    }

    #[test]
    fn backwards_block_time_is_tolerated() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        window.add(trade(60, "w1", dec!(10), dec!(1.0), TradeAction::Buy));
        window.add(trade(30, "w2", dec!(20), dec!(1.1), TradeAction::Buy));
        let stats = window.stats();
        assert_eq!(stats.tx_count, 2);
        assert_eq!(stats.last_update, ts(30));
    }

    #[test]
    fn tail_stats_use_boundary_price_and_partition_big_trades() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        window.add(trade(0, "w0", dec!(100), dec!(1.00), TradeAction::Buy));
        window.add(trade(50, "w1", dec!(700), dec!(1.05), TradeAction::Buy));
        window.add(trade(65, "w2", dec!(650), dec!(1.10), TradeAction::Buy));
        window.add(trade(70, "w2", dec!(100), dec!(1.12), TradeAction::Buy));
        window.add(trade(80, "w3", dec!(800), dec!(1.20), TradeAction::Sell));

        let stats = window.last_30s_stats(Some(dec!(600)));
        // Tail covers t in [50, 80]; boundary price comes from t=0.
        assert_eq!(stats.tx_count, 4);
        assert_eq!(stats.volume_usd, dec!(2250));
        assert_eq!(stats.unique_wallets, 3);
        assert_eq!(stats.start_price, dec!(1.00));
        assert_eq!(stats.current_price, dec!(1.20));
        assert_eq!(stats.price_change_percent, dec!(20));

        let big = stats.big_tx.expect("big tx stats requested");
        assert_eq!(big.total, 3);
        assert_eq!(big.buy_count, 2);
        assert_eq!(big.sell_count, 1);
        assert_eq!(big.unique_wallets, 3);
    }

    #[test]
    fn tail_stats_fall_back_to_oldest_price_when_all_trades_recent() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        window.add(trade(0, "w0", dec!(100), dec!(2.00), TradeAction::Buy));
        window.add(trade(10, "w1", dec!(100), dec!(2.50), TradeAction::Buy));

        let stats = window.last_30s_stats(None);
        assert_eq!(stats.start_price, dec!(2.00));
        assert_eq!(stats.price_change_percent, dec!(25));
        assert!(stats.big_tx.is_none());
    }

    #[test]
    fn max_single_readers_cover_the_trigger_exclusion() {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        assert_eq!(window.max_single_amount(), dec!(0));
        window.add(trade(0, "w0", dec!(1500), dec!(1.0), TradeAction::Buy));
        window.add(trade(10, "w1", dec!(12000), dec!(1.1), TradeAction::Buy));
        assert_eq!(window.max_single_amount(), dec!(12000));
        assert_eq!(window.max_single_amount_excluding_newest(), dec!(1500));
    }
}
