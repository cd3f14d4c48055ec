use rust_decimal::Decimal;

use super::{Condition, EvaluationContext};

/// Sudden whale entry into a quiet market. The triggering trade is
/// already in the window when this runs, so the quiet-state aggregates
/// subtract it: quiet volume, quiet trade count, and the largest single
/// amount are all measured over the window as it stood before the
/// trigger landed.
pub struct WhaleTransactionCondition {
    name: String,
    description: String,
    quiet_volume_max: Decimal,
    quiet_max_single: Decimal,
    sudden_threshold: Decimal,
    quiet_max_tx_count: usize,
}

impl WhaleTransactionCondition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        quiet_volume_max: Decimal,
        quiet_max_single: Decimal,
        sudden_threshold: Decimal,
        quiet_max_tx_count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            quiet_volume_max,
            quiet_max_single,
            sudden_threshold,
            quiet_max_tx_count,
        }
    }
}

impl Condition for WhaleTransactionCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        if ctx.trade.amount_usd <= self.sudden_threshold {
            return false;
        }

        let stats = ctx.stats_5m;
        let quiet_volume = stats.volume_usd - ctx.trade.amount_usd;
        if quiet_volume >= self.quiet_volume_max {
            return false;
        }
        if stats.tx_count.saturating_sub(1) >= self.quiet_max_tx_count {
            return false;
        }
        ctx.window.max_single_amount_excluding_newest() < self.quiet_max_single
    }
}
