//! 置信度评分
//!
//! 行置信度 = 策略原始置信度 - min(40, round(|差异%| * 10)), 下限 0.
//! 发票置信度 = 已解决行置信度的算术平均 (四舍五入), unmatched/unplanned 行不计入平均,
//! 单独统计为 unresolved.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::models::{
    InvoiceLine, MatchResult, MatchStatus, PoLineRef, PurchaseOrder, PurchaseOrderLine,
    VarianceType,
};

use super::strategy::{Assignment, LineOutcome, StrategyId};

/// 差异扣分上限
pub const MAX_VARIANCE_PENALTY: u8 = 40;

/// 置信度分档下限
pub const HIGH_BAND_MIN: u8 = 95;
pub const MEDIUM_BAND_MIN: u8 = 85;

/// 置信度分档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: u8) -> Self {
        if confidence >= HIGH_BAND_MIN {
            Self::High
        } else if confidence >= MEDIUM_BAND_MIN {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 带符号百分比变化 (invoiced - ordered) / ordered * 100, 保留两位小数
///
/// 订单值为 0 时: 发票值也为 0 返回 0, 否则返回 ±100
pub fn percent_change(invoiced: &BigDecimal, ordered: &BigDecimal) -> f64 {
    if ordered.is_zero() {
        return if invoiced.is_zero() {
            0.0
        } else if *invoiced > BigDecimal::zero() {
            100.0
        } else {
            -100.0
        };
    }

    let pct = ((invoiced - ordered) * BigDecimal::from(100)) / ordered;
    let pct = pct.to_f64().unwrap_or_default();
    (pct * 100.0).round() / 100.0
}

/// 一行相对PO行的差异
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variance {
    pub kind: VarianceType,
    pub pct: f64,
}

impl Variance {
    pub const NONE: Variance = Variance {
        kind: VarianceType::None,
        pct: 0.0,
    };
}

/// 取单价差异和数量差异中幅度较大者, 相同时取单价
pub fn measure_variance(line: &InvoiceLine, po_line: &PurchaseOrderLine) -> Variance {
    let price = percent_change(&line.unit_price, &po_line.unit_price);
    let quantity = percent_change(&line.quantity, &po_line.quantity);

    if price == 0.0 && quantity == 0.0 {
        Variance::NONE
    } else if price.abs() >= quantity.abs() {
        Variance {
            kind: VarianceType::Price,
            pct: price,
        }
    } else {
        Variance {
            kind: VarianceType::Quantity,
            pct: quantity,
        }
    }
}

/// min(40, round_half_up(|pct| * 10))
pub fn variance_penalty(variance_pct: f64) -> u8 {
    let scaled = (variance_pct.abs() * 10.0).round();
    if scaled >= f64::from(MAX_VARIANCE_PENALTY) {
        MAX_VARIANCE_PENALTY
    } else {
        scaled as u8
    }
}

/// 行置信度, 下限 0
pub fn line_confidence(raw_confidence: u8, variance_pct: f64) -> u8 {
    raw_confidence.saturating_sub(variance_penalty(variance_pct))
}

/// 差异在策略容差内为 matched; 超出时数量短缺为 partial, 其余为 exception
pub fn classify(strategy: StrategyId, variance: Variance) -> MatchStatus {
    if variance.pct.abs() <= strategy.tolerance_pct() {
        MatchStatus::Matched
    } else if variance.kind == VarianceType::Quantity && variance.pct < 0.0 {
        MatchStatus::Partial
    } else {
        MatchStatus::Exception
    }
}

/// 将管道输出转换为行级匹配结果 (护栏字段为空, 由护栏评估填充)
///
/// 认领的PO行必须存在于提供的PO中, 否则返回 `UnknownPoLine`
pub fn score_line(
    line: &InvoiceLine,
    outcome: &LineOutcome,
    po: Option<&PurchaseOrder>,
) -> Result<MatchResult, EngineError> {
    let base = MatchResult {
        invoice_id: line.invoice_id.clone(),
        line_num: line.line_num,
        po_line: None,
        strategy: None,
        raw_confidence: 0,
        confidence: 0,
        status: MatchStatus::Unmatched,
        variance_type: VarianceType::None,
        variance_pct: 0.0,
        triggered_guardrails: Vec::new(),
    };

    match outcome {
        LineOutcome::Unplanned => Ok(MatchResult {
            status: MatchStatus::Unplanned,
            variance_type: VarianceType::UnplannedCost,
            ..base
        }),
        LineOutcome::Unmatched => Ok(base),
        LineOutcome::Assigned(assignment) => {
            let Some((po, po_line)) = po.and_then(|po| po.line(assignment.po_line).map(|l| (po, l)))
            else {
                return Err(EngineError::UnknownPoLine {
                    line_num: line.line_num,
                    po_number: po.map(|po| po.po_number.clone()).unwrap_or_default(),
                    po_line: assignment.po_line,
                });
            };
            Ok(score_assignment(line, assignment, po, po_line, base))
        }
    }
}

fn score_assignment(
    line: &InvoiceLine,
    assignment: &Assignment,
    po: &PurchaseOrder,
    po_line: &PurchaseOrderLine,
    base: MatchResult,
) -> MatchResult {
    let variance = measure_variance(line, po_line);
    MatchResult {
        po_line: Some(PoLineRef {
            po_number: po.po_number.clone(),
            line_num: po_line.line_num,
        }),
        strategy: Some(assignment.strategy),
        raw_confidence: assignment.raw_confidence,
        confidence: line_confidence(assignment.raw_confidence, variance.pct),
        status: classify(assignment.strategy, variance),
        variance_type: variance.kind,
        variance_pct: variance.pct,
        ..base
    }
}

/// 发票级评分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceScore {
    pub confidence: Option<u8>,
    pub resolved_count: usize,
    pub unresolved_count: usize,
}

pub fn score_invoice(results: &[MatchResult]) -> InvoiceScore {
    let resolved: Vec<u8> = results
        .iter()
        .filter(|r| r.status.is_resolved())
        .map(|r| r.confidence)
        .collect();
    let unresolved_count = results.len() - resolved.len();

    let confidence = if resolved.is_empty() {
        None
    } else {
        let sum: u64 = resolved.iter().map(|&c| u64::from(c)).sum();
        let n = resolved.len() as u64;
        // 四舍五入的整数平均
        Some(((sum * 2 + n) / (2 * n)) as u8)
    };

    InvoiceScore {
        confidence,
        resolved_count: resolved.len(),
        unresolved_count,
    }
}
