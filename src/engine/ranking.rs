use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::EngineError;
use crate::models::{InvoiceSnapshot, PurchaseOrder};

use super::scorer::{score_invoice, score_line};
use super::strategy::match_lines;
use super::validate_snapshot;

/// 候选采购订单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoCandidate {
    pub po_number: String,
    pub matched_lines: usize,
    pub confidence: Option<u8>,
}

/// 用同一套策略管道对整个PO池重新匹配, 返回前 `limit` 个候选
///
/// 排序: 匹配行数降序, 发票置信度降序, PO号升序.
/// 发票行上的PO行号只对发票实际引用的PO有效.
pub fn rank_po_candidates(
    snapshot: &InvoiceSnapshot,
    pool: &[PurchaseOrder],
    limit: usize,
) -> Vec<PoCandidate> {
    if limit == 0 {
        return Vec::new();
    }

    // 同一PO号只评估第一次出现
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    let mut candidates: Vec<PoCandidate> = pool
        .iter()
        .filter(|&po| seen.insert(po.po_number.as_str()))
        .filter_map(|po| match score_candidate(snapshot, po) {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!(
                    "Invoice {}: skipping PO candidate {}: {}",
                    snapshot.header.invoice_id, po.po_number, e
                );
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.matched_lines
            .cmp(&a.matched_lines)
            .then_with(|| b.confidence.cmp(&a.confidence))
            .then_with(|| a.po_number.cmp(&b.po_number))
    });
    candidates.truncate(limit);
    candidates
}

/// 对单个PO试算; 没有任何已解决行时不算候选
fn score_candidate(
    snapshot: &InvoiceSnapshot,
    po: &PurchaseOrder,
) -> Result<Option<PoCandidate>, EngineError> {
    let trial = retarget(snapshot, po);
    validate_snapshot(&trial)?;

    let outcomes = match_lines(&trial)?;
    let results = trial
        .lines
        .iter()
        .zip(&outcomes)
        .map(|(line, outcome)| score_line(line, outcome, trial.purchase_order.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let score = score_invoice(&results);
    if score.resolved_count == 0 {
        return Ok(None);
    }
    Ok(Some(PoCandidate {
        po_number: po.po_number.clone(),
        matched_lines: score.resolved_count,
        confidence: score.confidence,
    }))
}

/// 把发票改为引用指定PO的试算快照
fn retarget(snapshot: &InvoiceSnapshot, po: &PurchaseOrder) -> InvoiceSnapshot {
    let same_po = snapshot.header.po_number.as_deref() == Some(po.po_number.as_str());

    let mut trial = snapshot.clone();
    trial.header.po_number = Some(po.po_number.clone());
    trial.purchase_order = Some(po.clone());
    if !same_po {
        for line in &mut trial.lines {
            line.po_line_ref = None;
        }
        trial.receipts.clear();
    }
    trial
}
