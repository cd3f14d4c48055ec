use rust_decimal::Decimal;

use super::{CompareOp, Condition, EvaluationContext, TimeFrame};

/// Shared fields of the stat-threshold conditions.
#[derive(Debug, Clone)]
struct ConditionBase {
    name: String,
    description: String,
    time_frame: TimeFrame,
    op: CompareOp,
}

impl ConditionBase {
    fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        time_frame: TimeFrame,
        op: CompareOp,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            time_frame,
            op,
        }
    }
}

/// Compares the frame's percent price change against a threshold.
pub struct PriceChangeCondition {
    base: ConditionBase,
    threshold: Decimal,
}

impl PriceChangeCondition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        time_frame: TimeFrame,
        op: CompareOp,
        threshold: Decimal,
    ) -> Self {
        Self {
            base: ConditionBase::new(name, description, time_frame, op),
            threshold,
        }
    }
}

impl Condition for PriceChangeCondition {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn description(&self) -> &str {
        &self.base.description
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        let Some(stats) = ctx.stats(self.base.time_frame) else {
            return false;
        };
        self.base.op.compare(stats.price_change_percent, self.threshold)
    }
}

/// Compares the frame's trade count against a threshold.
pub struct TxCountCondition {
    base: ConditionBase,
    threshold: usize,
}

impl TxCountCondition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        time_frame: TimeFrame,
        op: CompareOp,
        threshold: usize,
    ) -> Self {
        Self {
            base: ConditionBase::new(name, description, time_frame, op),
            threshold,
        }
    }
}

impl Condition for TxCountCondition {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn description(&self) -> &str {
        &self.base.description
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        let Some(stats) = ctx.stats(self.base.time_frame) else {
            return false;
        };
        self.base.op.compare(stats.tx_count, self.threshold)
    }
}

/// Compares the frame's USD volume against a threshold.
pub struct VolumeCondition {
    base: ConditionBase,
    threshold: Decimal,
}

impl VolumeCondition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        time_frame: TimeFrame,
        op: CompareOp,
        threshold: Decimal,
    ) -> Self {
        Self {
            base: ConditionBase::new(name, description, time_frame, op),
            threshold,
        }
    }
}

impl Condition for VolumeCondition {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn description(&self) -> &str {
        &self.base.description
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        let Some(stats) = ctx.stats(self.base.time_frame) else {
            return false;
        };
        self.base.op.compare(stats.volume_usd, self.threshold)
    }
}

/// Compares the frame's distinct wallet count against a threshold.
pub struct UniqueWalletsCondition {
    base: ConditionBase,
    threshold: usize,
}

impl UniqueWalletsCondition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        time_frame: TimeFrame,
        op: CompareOp,
        threshold: usize,
    ) -> Self {
        Self {
            base: ConditionBase::new(name, description, time_frame, op),
            threshold,
        }
    }
}

impl Condition for UniqueWalletsCondition {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn description(&self) -> &str {
        &self.base.description
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        let Some(stats) = ctx.stats(self.base.time_frame) else {
            return false;
        };
        self.base.op.compare(stats.unique_wallets, self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{eval_with_window, trade_at};
    use super::*;
    use crate::window::TokenWindow;
    use chrono::Duration;
    use memesignal_core_types::TradeAction;
    use rust_decimal_macros::dec;

    fn window_with_ramp() -> (TokenWindow, memesignal_core_types::Trade) {
        let mut window = TokenWindow::new("tok", Duration::minutes(5));
        window.add(trade_at(0, "w1", dec!(100), dec!(1.00), TradeAction::Buy));
        window.add(trade_at(60, "w2", dec!(200), dec!(1.10), TradeAction::Buy));
        let last = trade_at(120, "w3", dec!(300), dec!(1.25), TradeAction::Buy);
        window.add(last.clone());
        (window, last)
    }

    #[test]
    fn price_change_condition_reads_the_requested_frame() {
        let (window, last) = window_with_ramp();
        let five_min = PriceChangeCondition::new(
            "pc5m",
            "",
            TimeFrame::FiveMinutes,
            CompareOp::Gte,
            dec!(25),
        );
        let thirty_s = PriceChangeCondition::new(
            "pc30s",
            "",
            TimeFrame::ThirtySeconds,
            CompareOp::Gte,
            dec!(25),
        );
        assert!(eval_with_window(&window, &last, |ctx| five_min.evaluate(ctx)));
        // The 30s tail starts at the 1.10 print: +13.6%, under 25.
        assert!(!eval_with_window(&window, &last, |ctx| thirty_s.evaluate(ctx)));
    }

    #[test]
    fn count_volume_and_wallet_conditions_compare_their_stat() {
        let (window, last) = window_with_ramp();
        let tx = TxCountCondition::new("tx", "", TimeFrame::FiveMinutes, CompareOp::Gt, 2);
        let volume =
            VolumeCondition::new("vol", "", TimeFrame::FiveMinutes, CompareOp::Gte, dec!(600));
        let wallets =
            UniqueWalletsCondition::new("uw", "", TimeFrame::FiveMinutes, CompareOp::Eq, 3);
        assert!(eval_with_window(&window, &last, |ctx| tx.evaluate(ctx)));
        assert!(eval_with_window(&window, &last, |ctx| volume.evaluate(ctx)));
        assert!(eval_with_window(&window, &last, |ctx| wallets.evaluate(ctx)));
    }

    #[test]
    fn missing_one_minute_frame_evaluates_false() {
        let (window, last) = window_with_ramp();
        let one_min = TxCountCondition::new("tx1m", "", TimeFrame::OneMinute, CompareOp::Gte, 0);
        assert!(!eval_with_window(&window, &last, |ctx| one_min.evaluate(ctx)));
    }
}
