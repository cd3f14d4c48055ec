use rust_decimal::Decimal;

use super::{Condition, EvaluationContext};

/// Big-trade pressure over the last 30 seconds: enough distinct wallets
/// trading at or above the amount threshold, with buys dominating sells.
/// A tail with big buys and zero big sells passes regardless of ratio.
pub struct BigTransactionCondition {
    name: String,
    description: String,
    amount_threshold: Decimal,
    min_users: usize,
    buy_to_sell_ratio_min: f64,
}

impl BigTransactionCondition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        amount_threshold: Decimal,
        min_users: usize,
        buy_to_sell_ratio_min: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            amount_threshold,
            min_users,
            buy_to_sell_ratio_min,
        }
    }
}

impl Condition for BigTransactionCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        let stats = ctx.window.last_30s_stats(Some(self.amount_threshold));
        let Some(big) = stats.big_tx else {
            return false;
        };

        if big.unique_wallets < self.min_users {
            return false;
        }
        if big.sell_count == 0 {
            return big.buy_count > 0;
        }
        big.buy_count as f64 / big.sell_count as f64 >= self.buy_to_sell_ratio_min
    }
}
