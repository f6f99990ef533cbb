use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::guardrail::GuardrailId;
use crate::engine::scorer::ConfidenceBand;

use super::MatchStatus;

/// 过账资格, 按权限从高到低排序: Autopilot < ManualReview < Blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Eligibility {
    Autopilot,
    ManualReview,
    Blocked,
}

impl Eligibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Autopilot => "autopilot",
            Self::ManualReview => "manual-review",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转人工原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReviewReason {
    BelowThreshold,
    LowBand,
    SoftGuardrail,
    Unresolved { status: MatchStatus },
}

/// 行级决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub line_num: i32,
    pub eligibility: Eligibility,
    pub confidence: u8,
    pub band: ConfidenceBand,
    pub threshold: u8,
    pub forced_by: Vec<GuardrailId>,      // 导致非autopilot的护栏
    pub review_reasons: Vec<ReviewReason>,
}

/// 发票级决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDecision {
    pub invoice_id: String,
    pub eligibility: Eligibility,
    pub confidence: Option<u8>,
    pub threshold: u8,
    pub forced_by: Vec<GuardrailId>,
    pub audit_flags: Vec<GuardrailId>,
}
