use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::guardrail::GuardrailId;
use crate::engine::strategy::StrategyId;

/// 匹配状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStatus {
    Matched,
    Partial,
    Exception,
    Unplanned,
    Unmatched,
}

impl MatchStatus {
    /// 已匹配到PO行的状态 (matched / partial / exception)
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Matched | Self::Partial | Self::Exception)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Partial => "partial",
            Self::Exception => "exception",
            Self::Unplanned => "unplanned",
            Self::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 差异类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarianceType {
    None,
    Price,
    Quantity,
    UnplannedCost,
}

impl VarianceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Price => "price",
            Self::Quantity => "quantity",
            Self::UnplannedCost => "unplanned-cost",
        }
    }
}

impl fmt::Display for VarianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PO行引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoLineRef {
    pub po_number: String,
    pub line_num: i32,
}

impl fmt::Display for PoLineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.po_number, self.line_num)
    }
}

/// 行级匹配结果 - 每次运行重新计算, 引擎不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub invoice_id: String,
    pub line_num: i32,
    pub po_line: Option<PoLineRef>,
    pub strategy: Option<StrategyId>,     // None 即 "none"
    pub raw_confidence: u8,               // 策略原始置信度 (扣差异前)
    pub confidence: u8,
    pub status: MatchStatus,
    pub variance_type: VarianceType,
    pub variance_pct: f64,
    pub triggered_guardrails: Vec<GuardrailId>,
}
