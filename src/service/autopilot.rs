use chrono::Utc;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ExportConfig, MatchingConfig};
use crate::db::queries;
use crate::engine::{self, AutopilotThreshold, GuardrailSet};
use crate::error::{EngineError, ServiceError};
use crate::models::{InvoiceSnapshot, PurchaseOrder};
use crate::report::{self, InvoiceReport};

/// 自动过账评估服务
///
/// 从外部应付数据库物化快照, 调用纯函数引擎, 输出报表
pub struct AutopilotService {
    pool: PgPool,
    guardrails: Arc<GuardrailSet>,
    matching: MatchingConfig,
    export: ExportConfig,
}

impl AutopilotService {
    pub fn new(
        pool: PgPool,
        guardrails: Arc<GuardrailSet>,
        matching: MatchingConfig,
        export: ExportConfig,
    ) -> Self {
        Self {
            pool,
            guardrails,
            matching,
            export,
        }
    }

    /// 请求阈值优先, 否则使用配置的租户阈值
    pub fn resolve_threshold(&self, requested: Option<i64>) -> Result<AutopilotThreshold, EngineError> {
        match requested {
            Some(value) => Ok(AutopilotThreshold::new(value)?),
            None => Ok(self.matching.autopilot_threshold),
        }
    }

    /// 评估调用方直接提供的快照 (不访问数据库)
    pub fn evaluate_snapshot(
        &self,
        snapshot: &InvoiceSnapshot,
        candidate_pool: &[PurchaseOrder],
        threshold: Option<i64>,
    ) -> Result<InvoiceReport, EngineError> {
        let threshold = self.resolve_threshold(threshold)?;
        evaluate_one(
            snapshot,
            candidate_pool,
            &self.guardrails,
            threshold,
            self.matching.po_candidate_limit,
        )
    }

    /// 从数据库加载单张发票的快照
    pub async fn load_snapshot(&self, invoice_id: &str) -> Result<InvoiceSnapshot, ServiceError> {
        let header = queries::get_invoice(&self.pool, invoice_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(invoice_id.to_string()))?;
        let lines = queries::list_invoice_lines(&self.pool, invoice_id).await?;

        let gr_documents: Vec<String> = lines
            .iter()
            .filter_map(|l| l.gr_document_ref.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let purchase_order = async {
            match &header.po_number {
                Some(po_number) => queries::get_purchase_order(&self.pool, po_number).await,
                None => Ok(None),
            }
        };

        let (purchase_order, receipts, vendor, posted_history) = futures::try_join!(
            purchase_order,
            queries::list_goods_receipts(&self.pool, &gr_documents),
            queries::get_vendor_profile(&self.pool, &header.vendor_id),
            queries::list_posted_invoices(&self.pool, &header.vendor_id, invoice_id),
        )?;

        if header.po_number.is_some() && purchase_order.is_none() {
            tracing::warn!(
                "Invoice {}: referenced PO {:?} not found in the AP database",
                invoice_id, header.po_number
            );
        }

        Ok(InvoiceSnapshot {
            header,
            lines,
            purchase_order,
            receipts,
            vendor,
            posted_history,
        })
    }

    /// 批量评估入口
    pub async fn batch_evaluate(
        &self,
        invoice_ids: &[String],
        threshold: Option<i64>,
    ) -> Result<Vec<InvoiceReport>, ServiceError> {
        let threshold = self.resolve_threshold(threshold)?;

        // Phase 1: 加载快照和候选PO池
        let mut work: Vec<(InvoiceSnapshot, Vec<PurchaseOrder>)> = Vec::with_capacity(invoice_ids.len());
        for (idx, invoice_id) in invoice_ids.iter().enumerate() {
            let snapshot = self.load_snapshot(invoice_id).await?;
            let candidate_pool = if self.matching.po_candidate_limit > 0 {
                queries::list_open_purchase_orders(&self.pool, &snapshot.header.vendor_id).await?
            } else {
                Vec::new()
            };
            tracing::info!(
                "[Autopilot] 加载发票 {} ({} 行), 剩余 {}",
                invoice_id,
                snapshot.lines.len(),
                invoice_ids.len() - idx - 1
            );
            work.push((snapshot, candidate_pool));
        }

        // Phase 2: 并行评估 (rayon), 放到阻塞线程避免占用异步运行时
        let guardrails = Arc::clone(&self.guardrails);
        let limit = self.matching.po_candidate_limit;
        let reports = tokio::task::spawn_blocking(move || {
            use rayon::prelude::*;
            work.par_iter()
                .map(|(snapshot, pool)| evaluate_one(snapshot, pool, &guardrails, threshold, limit))
                .collect::<Result<Vec<_>, _>>()
        })
        .await??;

        let autopilot = reports
            .iter()
            .filter(|r| r.decision.eligibility == crate::models::Eligibility::Autopilot)
            .count();
        tracing::info!(
            "[Autopilot] 评估完成: 发票 {}, 自动过账 {}, 阈值 {}",
            reports.len(),
            autopilot,
            threshold
        );

        // Phase 3: 导出
        if let Some(path) = self.export_path() {
            report::export_to_csv(&reports, &path)?;
            tracing::info!("[Autopilot] 已导出 {}", path.display());
        }

        Ok(reports)
    }

    fn export_path(&self) -> Option<PathBuf> {
        self.export.dir.as_ref().map(|dir| {
            dir.join(format!(
                "autopilot-{}.csv",
                Utc::now().format("%Y%m%d%H%M%S%3f")
            ))
        })
    }
}

/// 评估一张发票并组装报表
pub fn evaluate_one(
    snapshot: &InvoiceSnapshot,
    candidate_pool: &[PurchaseOrder],
    guardrails: &GuardrailSet,
    threshold: AutopilotThreshold,
    candidate_limit: usize,
) -> Result<InvoiceReport, EngineError> {
    let evaluation = engine::evaluate_invoice(snapshot, guardrails, threshold)?;
    let candidates = engine::rank_po_candidates(snapshot, candidate_pool, candidate_limit);
    Ok(InvoiceReport::new(evaluation, candidates))
}
