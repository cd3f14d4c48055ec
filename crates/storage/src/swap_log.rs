use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashSet;

use crate::{format_ts, parse_decimal, parse_ts, SqliteStore};

pub const ACTION_BUY: i32 = 1;
pub const ACTION_SELL: i32 = 2;
pub const ACTION_TRANSFER: i32 = 3;

/// One row of the append-only swap log.
#[derive(Debug, Clone)]
pub struct SwapRow {
    pub id: u64,
    pub tx_hash: String,
    pub inst_idx_in_tx: String,
    pub block_id: u64,
    pub block_time: DateTime<Utc>,
    pub user_wallet: String,
    pub user_wallet2: String,
    pub token_address: String,
    pub amount_usd: Decimal,
    pub price_usd: Decimal,
    pub action: i32,
    pub is_bundled: bool,
}

/// Insert payload; the log assigns the id.
#[derive(Debug, Clone)]
pub struct NewSwap {
    pub tx_hash: String,
    pub inst_idx_in_tx: String,
    pub block_id: u64,
    pub block_time: DateTime<Utc>,
    pub user_wallet: String,
    pub user_wallet2: String,
    pub token_address: String,
    pub amount_usd: Decimal,
    pub price_usd: Decimal,
    pub action: i32,
    pub is_bundled: bool,
}

impl SqliteStore {
    /// Buy/sell rows with id strictly greater than `last_id`, ascending.
    pub fn swaps_after_id(&self, last_id: u64, limit: usize) -> Result<Vec<SwapRow>> {
        let mut stmt = self
            .conn()
            .prepare_cached(
                "SELECT id, tx_hash, inst_idx_in_tx, block_id, block_time, user_wallet,
                        user_wallet2, token_address, amount_usd, price_usd, action, is_bundled
                 FROM swap_tx
                 WHERE id > ?1 AND action IN (1, 2) AND is_loss_tx = 0
                 ORDER BY id ASC
                 LIMIT ?2",
            )
            .context("failed to prepare swaps_after_id")?;
        let rows = stmt
            .query_map(params![last_id as i64, limit as i64], row_to_swap)
            .context("failed to query swaps_after_id")?;

        let mut swaps = Vec::new();
        for row in rows {
            swaps.push(row.context("failed to decode swap row")??);
        }
        Ok(swaps)
    }

    /// Smallest buy/sell row id at or after `since`; 0 when none exist.
    pub fn min_id_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let min_id: i64 = self
            .conn()
            .query_row(
                "SELECT COALESCE(MIN(id), 0) FROM swap_tx
                 WHERE block_time >= ?1 AND action IN (1, 2) AND is_loss_tx = 0",
                params![format_ts(since)],
                |row| row.get(0),
            )
            .context("failed to query min_id_since")?;
        Ok(min_id.max(0) as u64)
    }

    /// Fraction of this token's buy/sell rows flagged as bundled, in [0, 1].
    pub fn bundle_ratio(&self, token_address: &str) -> Result<f64> {
        let (total, bundled): (i64, i64) = self
            .conn()
            .query_row(
                "SELECT COUNT(1), COALESCE(SUM(is_bundled != 0), 0) FROM swap_tx
                 WHERE token_address = ?1 AND action IN (1, 2)",
                params![token_address],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to query bundle_ratio")?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(bundled as f64 / total as f64)
    }

    /// Percent of `supply` held by wallets that received this token via a
    /// transfer row (`action = 3`, recipient column `user_wallet2`).
    pub fn phishing_ratio(
        &self,
        token_address: &str,
        holder_wallets: &[String],
        supply: Decimal,
    ) -> Result<f64> {
        if supply.is_zero() || holder_wallets.is_empty() {
            return Ok(0.0);
        }

        let mut stmt = self
            .conn()
            .prepare_cached(
                "SELECT DISTINCT user_wallet2 FROM swap_tx
                 WHERE token_address = ?1 AND action = 3 AND user_wallet2 != ''",
            )
            .context("failed to prepare transfer recipient query")?;
        let recipients = stmt
            .query_map(params![token_address], |row| row.get::<_, String>(0))
            .context("failed to query transfer recipients")?
            .collect::<rusqlite::Result<HashSet<String>>>()
            .context("failed to decode transfer recipients")?;
        if recipients.is_empty() {
            return Ok(0.0);
        }

        let holder_set: HashSet<&str> = holder_wallets.iter().map(String::as_str).collect();
        let mut flagged_total = Decimal::ZERO;
        for holder in self.holders(token_address)? {
            if recipients.contains(&holder.wallet_address)
                && holder_set.contains(holder.wallet_address.as_str())
            {
                flagged_total += holder.amount;
            }
        }
        if flagged_total.is_zero() {
            return Ok(0.0);
        }

        let ratio = flagged_total / supply * Decimal::ONE_HUNDRED;
        Ok(ratio.to_f64().unwrap_or(0.0))
    }

    pub fn insert_swap(&self, swap: &NewSwap) -> Result<u64> {
        self.conn()
            .execute(
                "INSERT INTO swap_tx (tx_hash, inst_idx_in_tx, block_id, block_time, user_wallet,
                                      user_wallet2, token_address, amount_usd, price_usd, action,
                                      is_bundled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    swap.tx_hash,
                    swap.inst_idx_in_tx,
                    swap.block_id as i64,
                    format_ts(swap.block_time),
                    swap.user_wallet,
                    swap.user_wallet2,
                    swap.token_address,
                    swap.amount_usd.to_string(),
                    swap.price_usd.to_string(),
                    swap.action,
                    swap.is_bundled as i32,
                ],
            )
            .context("failed to insert swap row")?;
        Ok(self.conn().last_insert_rowid() as u64)
    }
}

fn row_to_swap(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<SwapRow>> {
    let id: i64 = row.get(0)?;
    let block_id: i64 = row.get(3)?;
    let block_time: String = row.get(4)?;
    let amount_usd: String = row.get(8)?;
    let price_usd: String = row.get(9)?;
    let is_bundled: i32 = row.get(11)?;

    Ok((|| {
        Ok(SwapRow {
            id: id.max(0) as u64,
            tx_hash: row.get(1)?,
            inst_idx_in_tx: row.get(2)?,
            block_id: block_id.max(0) as u64,
            block_time: parse_ts(&block_time)?,
            user_wallet: row.get(5)?,
            user_wallet2: row.get(6)?,
            token_address: row.get(7)?,
            amount_usd: parse_decimal(&amount_usd)?,
            price_usd: parse_decimal(&price_usd)?,
            action: row.get(10)?,
            is_bundled: is_bundled != 0,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn test_store() -> Result<(tempfile::TempDir, SqliteStore)> {
        let temp = tempdir().context("tempdir")?;
        let mut store = SqliteStore::open(&temp.path().join("test.db"))?;
        let migrations = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        store.run_migrations(&migrations)?;
        Ok((temp, store))
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    fn swap(token: &str, action: i32, block_time: DateTime<Utc>) -> NewSwap {
        NewSwap {
            tx_hash: format!("sig-{}", block_time.timestamp()),
            inst_idx_in_tx: "0".to_string(),
            block_id: 1,
            block_time,
            user_wallet: "wallet-a".to_string(),
            user_wallet2: String::new(),
            token_address: token.to_string(),
            amount_usd: dec!(100),
            price_usd: dec!(1.0),
            action,
            is_bundled: false,
        }
    }

    #[test]
    fn after_id_returns_only_buy_sell_rows_in_order() -> Result<()> {
        let (_temp, store) = test_store()?;
        let base = ts("2026-03-01T10:00:00Z");
        let first = store.insert_swap(&swap("tok", ACTION_BUY, base))?;
        store.insert_swap(&swap("tok", ACTION_TRANSFER, base))?;
        let third = store.insert_swap(&swap("tok", ACTION_SELL, base))?;

        let rows = store.swaps_after_id(0, 10)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, first);
        assert_eq!(rows[1].id, third);

        let rows = store.swaps_after_id(first, 10)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, third);
        Ok(())
    }

    #[test]
    fn min_id_since_ignores_older_rows() -> Result<()> {
        let (_temp, store) = test_store()?;
        store.insert_swap(&swap("tok", ACTION_BUY, ts("2026-03-01T09:00:00Z")))?;
        let recent = store.insert_swap(&swap("tok", ACTION_BUY, ts("2026-03-01T10:02:00Z")))?;

        assert_eq!(store.min_id_since(ts("2026-03-01T10:00:00Z"))?, recent);
        assert_eq!(store.min_id_since(ts("2026-03-01T11:00:00Z"))?, 0);
        Ok(())
    }

    #[test]
    fn bundle_ratio_counts_flagged_buy_sell_rows() -> Result<()> {
        let (_temp, store) = test_store()?;
        let base = ts("2026-03-01T10:00:00Z");
        for i in 0..10 {
            let mut row = swap("tok", ACTION_BUY, base);
            row.tx_hash = format!("sig-{i}");
            row.is_bundled = i < 4;
            store.insert_swap(&row)?;
        }
        // Transfer rows never count toward the ratio.
        let mut transfer = swap("tok", ACTION_TRANSFER, base);
        transfer.is_bundled = true;
        store.insert_swap(&transfer)?;

        let ratio = store.bundle_ratio("tok")?;
        assert!((ratio - 0.4).abs() < 1e-9);
        assert_eq!(store.bundle_ratio("unknown")?, 0.0);
        Ok(())
    }

    #[test]
    fn phishing_ratio_flags_transfer_recipients_among_holders() -> Result<()> {
        let (_temp, store) = test_store()?;
        let base = ts("2026-03-01T10:00:00Z");

        let mut transfer = swap("tok", ACTION_TRANSFER, base);
        transfer.user_wallet2 = "holder-1".to_string();
        store.insert_swap(&transfer)?;

        store.upsert_token_info("tok", "TOK", dec!(1.0), dec!(1000))?;
        store.upsert_holder("tok", "holder-1", dec!(250))?;
        store.upsert_holder("tok", "holder-2", dec!(500))?;

        let holders = vec!["holder-1".to_string(), "holder-2".to_string()];
        let ratio = store.phishing_ratio("tok", &holders, dec!(1000))?;
        assert!((ratio - 25.0).abs() < 1e-9);

        assert_eq!(store.phishing_ratio("tok", &holders, dec!(0))?, 0.0);
        assert_eq!(store.phishing_ratio("tok", &[], dec!(1000))?, 0.0);
        Ok(())
    }
}
