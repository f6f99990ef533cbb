//! 报表视图 - 供外部看板/审计日志/过账系统消费的只读结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::{ConfidenceBand, GuardrailId, InvoiceEvaluation, InvoiceScore, PoCandidate};
use crate::models::{Decision, InvoiceDecision, MatchResult};

/// 行级报表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReport {
    pub result: MatchResult,
    pub decision: Decision,
}

/// 发票报表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceReport {
    pub invoice_id: String,
    pub lines: Vec<LineReport>,
    pub decision: InvoiceDecision,
    pub score: InvoiceScore,
    pub audit_flags: Vec<GuardrailId>,
    pub po_candidates: Vec<PoCandidate>,
    pub evaluated_at: DateTime<Utc>,
}

impl InvoiceReport {
    pub fn new(evaluation: InvoiceEvaluation, po_candidates: Vec<PoCandidate>) -> Self {
        let InvoiceEvaluation {
            results,
            decisions,
            invoice_decision,
            score,
        } = evaluation;

        let lines = results
            .into_iter()
            .zip(decisions)
            .map(|(result, decision)| LineReport { result, decision })
            .collect();

        Self {
            invoice_id: invoice_decision.invoice_id.clone(),
            lines,
            audit_flags: invoice_decision.audit_flags.clone(),
            decision: invoice_decision,
            score,
            po_candidates,
            evaluated_at: Utc::now(),
        }
    }

    /// 发票级置信度分档 (没有已解决行时为 None)
    pub fn band(&self) -> Option<ConfidenceBand> {
        self.score.confidence.map(ConfidenceBand::from_confidence)
    }
}

fn join_ids(ids: &[GuardrailId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

/// 导出报表到 CSV, 每个发票行一条记录
pub fn export_to_csv(
    reports: &[InvoiceReport],
    output_path: &Path,
) -> Result<(), csv::Error> {
    use csv::Writer;

    let mut writer = Writer::from_path(output_path)?;

    writer.write_record([
        "invoice_id",
        "line_num",
        "po_number",
        "po_line",
        "strategy",
        "raw_confidence",
        "confidence",
        "band",
        "status",
        "variance_type",
        "variance_pct",
        "guardrails",
        "eligibility",
        "forced_by",
        "threshold",
        "invoice_eligibility",
        "invoice_band",
        "evaluated_at",
    ])?;

    for report in reports {
        for line in &report.lines {
            let result = &line.result;
            let decision = &line.decision;
            writer.write_record(&[
                result.invoice_id.clone(),
                result.line_num.to_string(),
                result.po_line.as_ref().map(|p| p.po_number.clone()).unwrap_or_default(),
                result.po_line.as_ref().map(|p| p.line_num.to_string()).unwrap_or_default(),
                result.strategy.map(|s| s.as_str()).unwrap_or("none").to_string(),
                result.raw_confidence.to_string(),
                result.confidence.to_string(),
                decision.band.to_string(),
                result.status.to_string(),
                result.variance_type.to_string(),
                format!("{:.2}", result.variance_pct),
                join_ids(&result.triggered_guardrails),
                decision.eligibility.to_string(),
                join_ids(&decision.forced_by),
                decision.threshold.to_string(),
                report.decision.eligibility.to_string(),
                report.band().map(|b| b.to_string()).unwrap_or_default(),
                report.evaluated_at.to_rfc3339(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}
