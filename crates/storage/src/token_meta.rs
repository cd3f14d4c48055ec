use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::{parse_decimal, SqliteStore};

#[derive(Debug, Clone)]
pub struct TokenInfoRow {
    pub token_address: String,
    pub symbol: String,
    pub current_price: Decimal,
    pub supply: Decimal,
}

#[derive(Debug, Clone)]
pub struct TokenHolderRow {
    pub wallet_address: String,
    pub amount: Decimal,
}

impl SqliteStore {
    pub fn token_info(&self, token_address: &str) -> Result<Option<TokenInfoRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT token_address, symbol, current_price, supply
                 FROM tokens_info WHERE token_address = ?1",
                params![token_address],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to query token_info")?;

        row.map(|(token_address, symbol, current_price, supply)| {
            Ok(TokenInfoRow {
                token_address,
                symbol,
                current_price: parse_decimal(&current_price)?,
                supply: parse_decimal(&supply)?,
            })
        })
        .transpose()
    }

    /// Holders with a positive balance.
    pub fn holder_count(&self, token_address: &str) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(1) FROM bi_token_holders
                 WHERE token_address = ?1 AND CAST(amount AS REAL) > 0",
                params![token_address],
                |row| row.get(0),
            )
            .context("failed to query holder_count")?;
        Ok(count.max(0) as u64)
    }

    /// All positive-balance holders, largest first.
    pub fn holders(&self, token_address: &str) -> Result<Vec<TokenHolderRow>> {
        let mut stmt = self
            .conn()
            .prepare_cached(
                "SELECT wallet_address, amount FROM bi_token_holders
                 WHERE token_address = ?1 AND CAST(amount AS REAL) > 0
                 ORDER BY CAST(amount AS REAL) DESC",
            )
            .context("failed to prepare holders query")?;
        let rows = stmt
            .query_map(params![token_address], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query holders")?;

        let mut holders = Vec::new();
        for row in rows {
            let (wallet_address, amount) = row.context("failed to decode holder row")?;
            holders.push(TokenHolderRow {
                wallet_address,
                amount: parse_decimal(&amount)?,
            });
        }
        Ok(holders)
    }

    /// Percent of `supply` held by the ten largest holders.
    pub fn top10_holders_ratio(&self, token_address: &str, supply: Decimal) -> Result<f64> {
        if supply.is_zero() {
            return Ok(0.0);
        }
        let top10_total: Decimal = self
            .holders(token_address)?
            .into_iter()
            .take(10)
            .map(|holder| holder.amount)
            .sum();
        if top10_total.is_zero() {
            return Ok(0.0);
        }
        let ratio = top10_total / supply * Decimal::ONE_HUNDRED;
        Ok(ratio.to_f64().unwrap_or(0.0))
    }

    pub fn upsert_token_info(
        &self,
        token_address: &str,
        symbol: &str,
        current_price: Decimal,
        supply: Decimal,
    ) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tokens_info (token_address, symbol, current_price, supply)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (token_address) DO UPDATE SET
                     symbol = excluded.symbol,
                     current_price = excluded.current_price,
                     supply = excluded.supply",
                params![
                    token_address,
                    symbol,
                    current_price.to_string(),
                    supply.to_string()
                ],
            )
            .context("failed to upsert token_info")?;
        Ok(())
    }

    pub fn upsert_holder(
        &self,
        token_address: &str,
        wallet_address: &str,
        amount: Decimal,
    ) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO bi_token_holders (token_address, wallet_address, amount)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (token_address, wallet_address) DO UPDATE SET
                     amount = excluded.amount",
                params![token_address, wallet_address, amount.to_string()],
            )
            .context("failed to upsert holder")?;
        Ok(())
    }
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

    #[test]
    fn token_info_round_trips() -> Result<()> {
        let (_temp, store) = test_store()?;
        assert!(store.token_info("tok")?.is_none());

        store.upsert_token_info("tok", "TOK", dec!(0.0042), dec!(1000000000))?;
        let info = store.token_info("tok")?.expect("token info exists");
        assert_eq!(info.symbol, "TOK");
        assert_eq!(info.current_price, dec!(0.0042));
        assert_eq!(info.supply, dec!(1000000000));

        store.upsert_token_info("tok", "TOK2", dec!(0.005), dec!(1000000000))?;
        let info = store.token_info("tok")?.expect("token info exists");
        assert_eq!(info.symbol, "TOK2");
        Ok(())
    }

    #[test]
    fn holder_queries_skip_zero_balances() -> Result<()> {
        let (_temp, store) = test_store()?;
        store.upsert_holder("tok", "w1", dec!(10))?;
        store.upsert_holder("tok", "w2", dec!(0))?;
        store.upsert_holder("tok", "w3", dec!(90))?;

        assert_eq!(store.holder_count("tok")?, 2);
        let holders = store.holders("tok")?;
        assert_eq!(holders.len(), 2);
        assert_eq!(holders[0].wallet_address, "w3");
        Ok(())
    }

    #[test]
    fn top10_ratio_uses_largest_holders() -> Result<()> {
        let (_temp, store) = test_store()?;
        for i in 0..12 {
            store.upsert_holder("tok", &format!("w{i}"), Decimal::from(100 - i))?;
        }
        // Top ten hold 100 + 99 + ... + 91 = 955 of a 10_000 supply.
        let ratio = store.top10_holders_ratio("tok", dec!(10000))?;
        assert!((ratio - 9.55).abs() < 1e-9);
        assert_eq!(store.top10_holders_ratio("tok", dec!(0))?, 0.0);
        Ok(())
    }
}
