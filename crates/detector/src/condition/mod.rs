use memesignal_core_types::{TokenStats, Trade};

use crate::window::TokenWindow;

mod big_transaction;
mod primitive;
mod whale;

pub use self::big_transaction::BigTransactionCondition;
pub use self::primitive::{
    PriceChangeCondition, TxCountCondition, UniqueWalletsCondition, VolumeCondition,
};
pub use self::whale::WhaleTransactionCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFrame {
    FiveMinutes,
    OneMinute,
    ThirtySeconds,
}

impl TimeFrame {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinutes => "5m",
            Self::OneMinute => "1m",
            Self::ThirtySeconds => "30s",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gte => ">=",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Lt => "<",
            Self::Eq => "==",
        }
    }

    pub fn compare<T: PartialOrd>(self, value: T, threshold: T) -> bool {
        match self {
            Self::Gte => value >= threshold,
            Self::Gt => value > threshold,
            Self::Lte => value <= threshold,
            Self::Lt => value < threshold,
            Self::Eq => value == threshold,
        }
    }
}

/// Everything a condition may look at for one trade. Borrows the
/// worker-owned window for the duration of the evaluation only.
pub struct EvaluationContext<'a> {
    pub stats_5m: &'a TokenStats,
    pub stats_30s: &'a TokenStats,
    pub stats_1m: Option<&'a TokenStats>,
    pub trade: &'a Trade,
    pub window: &'a TokenWindow,
}

impl<'a> EvaluationContext<'a> {
    pub fn stats(&self, frame: TimeFrame) -> Option<&'a TokenStats> {
        match frame {
            TimeFrame::FiveMinutes => Some(self.stats_5m),
            TimeFrame::ThirtySeconds => Some(self.stats_30s),
            TimeFrame::OneMinute => self.stats_1m,
        }
    }
}

pub trait Condition: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

/// AND is true iff children are non-empty and all true; OR iff any child
/// is true; NOT requires exactly one child. Evaluation short-circuits.
pub struct CompositeCondition {
    name: String,
    description: String,
    operator: LogicalOperator,
    children: Vec<Box<dyn Condition>>,
}

impl Condition for CompositeCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        match self.operator {
            LogicalOperator::And => {
                !self.children.is_empty() && self.children.iter().all(|child| child.evaluate(ctx))
            }
            LogicalOperator::Or => self.children.iter().any(|child| child.evaluate(ctx)),
            LogicalOperator::Not => {
                self.children.len() == 1 && !self.children[0].evaluate(ctx)
            }
        }
    }
}

/// Chained assembly of an immutable condition tree.
pub struct ConditionBuilder {
    name: String,
    description: String,
    operator: LogicalOperator,
    children: Vec<Box<dyn Condition>>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            operator: LogicalOperator::And,
            children: Vec::new(),
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

    pub fn and(mut self, condition: Box<dyn Condition>) -> Self {
        self.operator = LogicalOperator::And;
        self.children.push(condition);
        self
    }

    pub fn or(mut self, condition: Box<dyn Condition>) -> Self {
        self.operator = LogicalOperator::Or;
        self.children.push(condition);
        self
    }

    pub fn not(mut self, condition: Box<dyn Condition>) -> Self {
        self.operator = LogicalOperator::Not;
        self.children = vec![condition];
        self
    }

    pub fn build(mut self) -> Box<dyn Condition> {
        if self.children.len() == 1 && self.operator == LogicalOperator::And {
            return self.children.remove(0);
        }
        Box::new(CompositeCondition {
            name: self.name,
            description: self.description,
            operator: self.operator,
            children: self.children,
        })
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
