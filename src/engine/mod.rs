//! 发票行匹配与自动过账决策引擎
//!
//! 数据单向流动: 策略管道 -> 评分 -> 护栏 -> 决策. 每个阶段都是输入的纯函数,
//! 发票之间不共享可变状态.

pub mod decision;
pub mod guardrail;
pub mod ranking;
pub mod scorer;
pub mod similarity;
pub mod strategy;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::EngineError;
use crate::models::{Decision, InvoiceDecision, InvoiceSnapshot, MatchResult};

pub use decision::{decide_invoice, decide_line, validate_result, AutopilotThreshold};
pub use guardrail::{GuardrailDefinition, GuardrailId, GuardrailLimits, GuardrailSet, Severity};
pub use ranking::{rank_po_candidates, PoCandidate};
pub use scorer::{score_invoice, ConfidenceBand, InvoiceScore};
pub use strategy::{match_lines, match_lines_with_prior, LineOutcome, StrategyId};

/// 单张发票的评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceEvaluation {
    pub results: Vec<MatchResult>,      // 与输入行顺序一致
    pub decisions: Vec<Decision>,
    pub invoice_decision: InvoiceDecision,
    pub score: InvoiceScore,
}

/// 输入快照的数据完整性校验
pub fn validate_snapshot(snapshot: &InvoiceSnapshot) -> Result<(), EngineError> {
    let invoice_id = &snapshot.header.invoice_id;

    let mut seen = BTreeSet::new();
    for line in &snapshot.lines {
        if &line.invoice_id != invoice_id {
            return Err(EngineError::ForeignLine {
                expected: invoice_id.clone(),
                found: line.invoice_id.clone(),
                line_num: line.line_num,
            });
        }
        if !seen.insert(line.line_num) {
            return Err(EngineError::DuplicateInvoiceLine {
                invoice_id: invoice_id.clone(),
                line_num: line.line_num,
            });
        }
        line.check_amount()?;
    }

    if let (Some(po_number), None) = (&snapshot.header.po_number, &snapshot.purchase_order) {
        return Err(EngineError::MissingPurchaseOrder {
            invoice_id: invoice_id.clone(),
            po_number: po_number.clone(),
        });
    }

    if let (Some(expected), Some(po)) = (&snapshot.header.po_number, &snapshot.purchase_order) {
        if expected != &po.po_number {
            return Err(EngineError::PurchaseOrderMismatch {
                invoice_id: invoice_id.clone(),
                expected: expected.clone(),
                found: po.po_number.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for line in &po.lines {
            if line.po_number != po.po_number {
                return Err(EngineError::PurchaseOrderMismatch {
                    invoice_id: invoice_id.clone(),
                    expected: po.po_number.clone(),
                    found: line.po_number.clone(),
                });
            }
            if !seen.insert(line.line_num) {
                return Err(EngineError::DuplicatePoLine {
                    po_number: po.po_number.clone(),
                    line_num: line.line_num,
                });
            }
        }
    }

    Ok(())
}

/// 校验匹配结果引用的PO行都在快照提供的PO中
pub fn check_po_references(
    snapshot: &InvoiceSnapshot,
    results: &[MatchResult],
) -> Result<(), EngineError> {
    for result in results {
        let Some(po_ref) = &result.po_line else {
            continue;
        };
        let known = snapshot
            .purchase_order
            .as_ref()
            .filter(|po| po.po_number == po_ref.po_number)
            .and_then(|po| po.line(po_ref.line_num))
            .is_some();
        if !known {
            return Err(EngineError::UnknownPoLine {
                line_num: result.line_num,
                po_number: po_ref.po_number.clone(),
                po_line: po_ref.line_num,
            });
        }
    }
    Ok(())
}

/// 对已有匹配结果做决策 (结果须与快照行一一对应)
pub fn decide(
    snapshot: &InvoiceSnapshot,
    results: Vec<MatchResult>,
    guardrails: &GuardrailSet,
    threshold: AutopilotThreshold,
) -> Result<InvoiceEvaluation, EngineError> {
    check_po_references(snapshot, &results)?;

    let decisions = results
        .iter()
        .map(|r| decide_line(r, guardrails, threshold))
        .collect::<Result<Vec<_>, _>>()?;
    let score = score_invoice(&results);
    let invoice_decision = decide_invoice(
        &snapshot.header.invoice_id,
        &results,
        &decisions,
        &score,
        guardrails,
        threshold,
    );

    tracing::debug!(
        "Invoice {}: {} (confidence {:?}, threshold {}, unresolved {})",
        snapshot.header.invoice_id,
        invoice_decision.eligibility,
        score.confidence,
        threshold,
        score.unresolved_count
    );

    Ok(InvoiceEvaluation {
        results,
        decisions,
        invoice_decision,
        score,
    })
}

/// 评估单张发票: 匹配 -> 评分 -> 护栏 -> 决策
pub fn evaluate_invoice(
    snapshot: &InvoiceSnapshot,
    guardrails: &GuardrailSet,
    threshold: AutopilotThreshold,
) -> Result<InvoiceEvaluation, EngineError> {
    evaluate_with_prior(snapshot, &[], guardrails, threshold)
}

/// 以上一轮的匹配结果为起点重新评估
pub fn evaluate_with_prior(
    snapshot: &InvoiceSnapshot,
    prior: &[MatchResult],
    guardrails: &GuardrailSet,
    threshold: AutopilotThreshold,
) -> Result<InvoiceEvaluation, EngineError> {
    validate_snapshot(snapshot)?;

    let outcomes = match_lines_with_prior(snapshot, prior)?;
    let results: Vec<MatchResult> = snapshot
        .lines
        .iter()
        .zip(&outcomes)
        .map(|(line, outcome)| scorer::score_line(line, outcome, snapshot.purchase_order.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let results = guardrails.apply(snapshot, results);

    decide(snapshot, results, guardrails, threshold)
}

/// 并行评估多张发票, 输出顺序与输入一致
pub fn evaluate_batch(
    snapshots: &[InvoiceSnapshot],
    guardrails: &GuardrailSet,
    threshold: AutopilotThreshold,
) -> Vec<Result<InvoiceEvaluation, EngineError>> {
    snapshots
        .par_iter()
        .map(|snapshot| evaluate_invoice(snapshot, guardrails, threshold))
        .collect()
}
