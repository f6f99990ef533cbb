//! 自动过账决策
//!
//! 行级:
//! 1. 任一 hard 护栏触发 -> blocked
//! 2. 置信度低于阈值 / 低分档 / soft 护栏触发 / 状态为 unplanned、unmatched、exception -> manual-review
//! 3. 其余 -> autopilot
//!
//! 发票级取最严格的行级结果.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConfigError, EngineError};
use crate::models::{Decision, Eligibility, InvoiceDecision, MatchResult, MatchStatus, ReviewReason, VarianceType};

use super::guardrail::{GuardrailId, GuardrailSet};
use super::scorer::{ConfidenceBand, InvoiceScore};

pub const DEFAULT_AUTOPILOT_THRESHOLD: u8 = 95;
pub const MIN_AUTOPILOT_THRESHOLD: u8 = 50;
pub const MAX_AUTOPILOT_THRESHOLD: u8 = 100;

/// 自动过账置信度阈值, 取值范围 [50, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct AutopilotThreshold(u8);

impl AutopilotThreshold {
    pub fn new(value: i64) -> Result<Self, ConfigError> {
        if value < i64::from(MIN_AUTOPILOT_THRESHOLD) || value > i64::from(MAX_AUTOPILOT_THRESHOLD) {
            return Err(ConfigError::ThresholdOutOfRange(value));
        }
        Ok(Self(value as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for AutopilotThreshold {
    fn default() -> Self {
        Self(DEFAULT_AUTOPILOT_THRESHOLD)
    }
}

impl TryFrom<i64> for AutopilotThreshold {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AutopilotThreshold> for u8 {
    fn from(threshold: AutopilotThreshold) -> Self {
        threshold.0
    }
}

impl fmt::Display for AutopilotThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 校验匹配结果的内部一致性, 不一致即拒绝
pub fn validate_result(result: &MatchResult) -> Result<(), EngineError> {
    let line = result.line_num;

    if result.confidence > 100 || result.raw_confidence > 100 {
        return Err(EngineError::inconsistent(line, "confidence above 100"));
    }
    if result.confidence > result.raw_confidence {
        return Err(EngineError::inconsistent(
            line,
            "confidence exceeds raw strategy confidence",
        ));
    }
    if !result.variance_pct.is_finite() {
        return Err(EngineError::inconsistent(line, "variance percentage is not finite"));
    }
    if result.variance_type == VarianceType::None && result.variance_pct != 0.0 {
        return Err(EngineError::inconsistent(
            line,
            "variance percentage set without a variance type",
        ));
    }

    match result.status {
        MatchStatus::Matched | MatchStatus::Partial | MatchStatus::Exception => {
            let (Some(_), Some(strategy)) = (&result.po_line, result.strategy) else {
                return Err(EngineError::inconsistent(
                    line,
                    format!("status {} without PO line and strategy", result.status),
                ));
            };
            if result.status == MatchStatus::Matched
                && result.variance_pct.abs() > strategy.tolerance_pct()
            {
                return Err(EngineError::inconsistent(
                    line,
                    format!(
                        "matched with variance {}% beyond {} tolerance {}%",
                        result.variance_pct,
                        strategy,
                        strategy.tolerance_pct()
                    ),
                ));
            }
        }
        MatchStatus::Unmatched | MatchStatus::Unplanned => {
            if result.po_line.is_some() || result.strategy.is_some() {
                return Err(EngineError::inconsistent(
                    line,
                    format!("status {} must not carry a PO line or strategy", result.status),
                ));
            }
        }
    }

    Ok(())
}

/// 行级决策
pub fn decide_line(
    result: &MatchResult,
    guardrails: &GuardrailSet,
    threshold: AutopilotThreshold,
) -> Result<Decision, EngineError> {
    validate_result(result)?;

    let triggered = guardrails
        .partition(&result.triggered_guardrails)
        .map_err(EngineError::UnknownGuardrail)?;
    let band = ConfidenceBand::from_confidence(result.confidence);

    let mut review_reasons = Vec::new();
    if result.confidence < threshold.value() {
        review_reasons.push(ReviewReason::BelowThreshold);
    }
    if band == ConfidenceBand::Low {
        review_reasons.push(ReviewReason::LowBand);
    }
    if !triggered.soft.is_empty() {
        review_reasons.push(ReviewReason::SoftGuardrail);
    }
    if matches!(
        result.status,
        MatchStatus::Unplanned | MatchStatus::Unmatched | MatchStatus::Exception
    ) {
        review_reasons.push(ReviewReason::Unresolved {
            status: result.status,
        });
    }

    let (eligibility, forced_by) = if !triggered.hard.is_empty() {
        (Eligibility::Blocked, triggered.hard)
    } else if !review_reasons.is_empty() {
        (Eligibility::ManualReview, triggered.soft)
    } else {
        (Eligibility::Autopilot, Vec::new())
    };

    Ok(Decision {
        line_num: result.line_num,
        eligibility,
        confidence: result.confidence,
        band,
        threshold: threshold.value(),
        forced_by,
        review_reasons,
    })
}

/// 发票级决策: blocked > manual-review > autopilot, 没有行的发票转人工
pub fn decide_invoice(
    invoice_id: &str,
    results: &[MatchResult],
    decisions: &[Decision],
    score: &InvoiceScore,
    guardrails: &GuardrailSet,
    threshold: AutopilotThreshold,
) -> InvoiceDecision {
    let eligibility = decisions
        .iter()
        .map(|d| d.eligibility)
        .max()
        .unwrap_or(Eligibility::ManualReview);

    let mut forced_by: Vec<GuardrailId> = decisions
        .iter()
        .flat_map(|d| d.forced_by.iter().copied())
        .collect();
    forced_by.sort();
    forced_by.dedup();

    let mut audit_flags: Vec<GuardrailId> = results
        .iter()
        .flat_map(|r| r.triggered_guardrails.iter().copied())
        .filter(|id| guardrails.severity_of(*id) == Some(super::guardrail::Severity::Audit))
        .collect();
    audit_flags.sort();
    audit_flags.dedup();

    InvoiceDecision {
        invoice_id: invoice_id.to_string(),
        eligibility,
        confidence: score.confidence,
        threshold: threshold.value(),
        forced_by,
        audit_flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::strategy::StrategyId;
    use crate::models::PoLineRef;

    fn matched(confidence: u8) -> MatchResult {
        MatchResult {
            invoice_id: "INV-1".to_string(),
            line_num: 1,
            po_line: Some(PoLineRef {
                po_number: "PO-1".to_string(),
                line_num: 10,
            }),
            strategy: Some(StrategyId::KeyBased),
            raw_confidence: 100,
            confidence,
            status: MatchStatus::Matched,
            variance_type: VarianceType::None,
            variance_pct: 0.0,
            triggered_guardrails: Vec::new(),
        }
    }

    fn threshold(v: i64) -> AutopilotThreshold {
        AutopilotThreshold::new(v).unwrap()
    }

    #[test]
    fn threshold_range_is_enforced() {
        assert!(AutopilotThreshold::new(50).is_ok());
        assert!(AutopilotThreshold::new(100).is_ok());
        assert_eq!(
            AutopilotThreshold::new(49),
            Err(ConfigError::ThresholdOutOfRange(49))
        );
        assert_eq!(
            AutopilotThreshold::new(101),
            Err(ConfigError::ThresholdOutOfRange(101))
        );
        assert_eq!(AutopilotThreshold::default().value(), 95);
    }

    #[test]
    fn threshold_deserialization_validates() {
        let ok: AutopilotThreshold = serde_json::from_str("90").unwrap();
        assert_eq!(ok.value(), 90);
        assert!(serde_json::from_str::<AutopilotThreshold>("20").is_err());
    }

    #[test]
    fn threshold_edges() {
        let set = GuardrailSet::default();
        let at = decide_line(&matched(95), &set, threshold(95)).unwrap();
        assert_eq!(at.eligibility, Eligibility::Autopilot);

        let below = decide_line(&matched(94), &set, threshold(95)).unwrap();
        assert_eq!(below.eligibility, Eligibility::ManualReview);
        assert_eq!(below.review_reasons, vec![ReviewReason::BelowThreshold]);

        let full = decide_line(&matched(100), &set, threshold(100)).unwrap();
        assert_eq!(full.eligibility, Eligibility::Autopilot);
    }

    #[test]
    fn low_band_never_autopilots() {
        let set = GuardrailSet::default();
        let d = decide_line(&matched(84), &set, threshold(50)).unwrap();
        assert_eq!(d.eligibility, Eligibility::ManualReview);
        assert_eq!(d.review_reasons, vec![ReviewReason::LowBand]);

        let medium = decide_line(&matched(85), &set, threshold(50)).unwrap();
        assert_eq!(medium.eligibility, Eligibility::Autopilot);
    }

    #[test]
    fn hard_guardrail_blocks_perfect_line() {
        let set = GuardrailSet::default();
        let mut result = matched(100);
        result.triggered_guardrails = vec![
            GuardrailId::DuplicatePosting,
            GuardrailId::PriceVariance,
            GuardrailId::VendorReliabilityWatch,
        ];
        let d = decide_line(&result, &set, threshold(95)).unwrap();
        assert_eq!(d.eligibility, Eligibility::Blocked);
        assert_eq!(d.forced_by, vec![GuardrailId::DuplicatePosting]);
    }

    #[test]
    fn soft_guardrail_downgrades_only() {
        let set = GuardrailSet::default();
        let mut result = matched(100);
        result.triggered_guardrails = vec![GuardrailId::PartialReceipt];
        let d = decide_line(&result, &set, threshold(95)).unwrap();
        assert_eq!(d.eligibility, Eligibility::ManualReview);
        assert_eq!(d.forced_by, vec![GuardrailId::PartialReceipt]);
    }

    #[test]
    fn audit_guardrail_does_not_change_eligibility() {
        let set = GuardrailSet::default();
        let mut result = matched(100);
        result.triggered_guardrails = vec![GuardrailId::VendorReliabilityWatch];
        let d = decide_line(&result, &set, threshold(95)).unwrap();
        assert_eq!(d.eligibility, Eligibility::Autopilot);
        assert!(d.forced_by.is_empty());
    }

    #[test]
    fn matched_without_po_line_is_rejected() {
        let mut result = matched(100);
        result.po_line = None;
        let err = decide_line(&result, &GuardrailSet::default(), threshold(95)).unwrap_err();
        assert!(matches!(err, EngineError::InconsistentMatch { line_num: 1, .. }));
    }

    #[test]
    fn unmatched_with_strategy_is_rejected() {
        let mut result = matched(0);
        result.raw_confidence = 0;
        result.status = MatchStatus::Unmatched;
        result.po_line = None;
        let err = decide_line(&result, &GuardrailSet::default(), threshold(95)).unwrap_err();
        assert!(matches!(err, EngineError::InconsistentMatch { .. }));
    }

    #[test]
    fn matched_beyond_tolerance_is_rejected() {
        let mut result = matched(40);
        result.variance_type = VarianceType::Price;
        result.variance_pct = 6.0;
        assert!(validate_result(&result).is_err());
    }

    #[test]
    fn unknown_guardrail_is_rejected() {
        let set = GuardrailSet::new(Vec::new(), Default::default());
        let mut result = matched(100);
        result.triggered_guardrails = vec![GuardrailId::PriceVariance];
        assert_eq!(
            decide_line(&result, &set, threshold(95)),
            Err(EngineError::UnknownGuardrail(GuardrailId::PriceVariance))
        );
    }

    #[test]
    fn invoice_takes_most_restrictive_line() {
        let set = GuardrailSet::default();
        let score = InvoiceScore {
            confidence: Some(100),
            resolved_count: 2,
            unresolved_count: 0,
        };
        let auto = decide_line(&matched(100), &set, threshold(95)).unwrap();
        let manual = decide_line(&matched(90), &set, threshold(95)).unwrap();
        let mut blocked_result = matched(100);
        blocked_result.triggered_guardrails = vec![GuardrailId::VendorPaymentBlock];
        let blocked = decide_line(&blocked_result, &set, threshold(95)).unwrap();

        let results = vec![matched(100), matched(90)];
        let d = decide_invoice("INV-1", &results, &[auto.clone(), auto.clone()], &score, &set, threshold(95));
        assert_eq!(d.eligibility, Eligibility::Autopilot);

        let d = decide_invoice("INV-1", &results, &[auto.clone(), manual.clone()], &score, &set, threshold(95));
        assert_eq!(d.eligibility, Eligibility::ManualReview);

        let d = decide_invoice("INV-1", &results, &[manual, blocked, auto], &score, &set, threshold(95));
        assert_eq!(d.eligibility, Eligibility::Blocked);
        assert_eq!(d.forced_by, vec![GuardrailId::VendorPaymentBlock]);
    }

    #[test]
    fn empty_invoice_goes_to_review() {
        let score = InvoiceScore {
            confidence: None,
            resolved_count: 0,
            unresolved_count: 0,
        };
        let d = decide_invoice("INV-0", &[], &[], &score, &GuardrailSet::default(), threshold(95));
        assert_eq!(d.eligibility, Eligibility::ManualReview);
    }
}
