//! 护栏规则
//!
//! 每条规则对每个发票行求值, 所有触发的规则都会被收集 (不止第一条).
//! hard 规则强制 blocked, soft 规则降级为 manual-review, audit 规则只记录.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::models::{InvoiceLine, InvoiceSnapshot, MatchResult, MatchStatus, VarianceType};

/// 护栏标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardrailId {
    DuplicatePosting,
    VendorPaymentBlock,
    InvoicePredatesPo,
    PriceVariance,
    QuantityVariance,
    PartialReceipt,
    VendorReliabilityWatch,
    LargeUnplannedCost,
}

impl GuardrailId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicatePosting => "duplicate-posting",
            Self::VendorPaymentBlock => "vendor-payment-block",
            Self::InvoicePredatesPo => "invoice-predates-po",
            Self::PriceVariance => "price-variance",
            Self::QuantityVariance => "quantity-variance",
            Self::PartialReceipt => "partial-receipt",
            Self::VendorReliabilityWatch => "vendor-reliability-watch",
            Self::LargeUnplannedCost => "large-unplanned-cost",
        }
    }
}

impl fmt::Display for GuardrailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Hard,
    Soft,
    Audit,
}

/// 护栏阈值 (可配置)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailLimits {
    pub soft_price_variance_pct: f64,
    pub soft_quantity_variance_pct: f64,
    pub reliability_watch: i32,
    pub large_unplanned_amount: f64,
}

impl Default for GuardrailLimits {
    fn default() -> Self {
        Self {
            soft_price_variance_pct: 2.0,
            soft_quantity_variance_pct: 2.0,
            reliability_watch: 70,
            large_unplanned_amount: 10_000.0,
        }
    }
}

/// 护栏定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailDefinition {
    pub id: GuardrailId,
    pub severity: Severity,
    pub description: String,
}

impl GuardrailDefinition {
    pub fn new(id: GuardrailId, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            id,
            severity,
            description: description.into(),
        }
    }

    /// 规则谓词
    pub fn fires(
        &self,
        line: &InvoiceLine,
        result: &MatchResult,
        ctx: &InvoiceContext<'_>,
        limits: &GuardrailLimits,
    ) -> bool {
        match self.id {
            GuardrailId::DuplicatePosting => ctx.duplicate_posted,
            GuardrailId::VendorPaymentBlock => ctx.snapshot.vendor.payment_block,
            GuardrailId::InvoicePredatesPo => ctx
                .snapshot
                .purchase_order
                .as_ref()
                .is_some_and(|po| ctx.snapshot.header.invoice_date < po.created_date),
            GuardrailId::PriceVariance => {
                result.variance_type == VarianceType::Price
                    && result.variance_pct.abs() > limits.soft_price_variance_pct
            }
            GuardrailId::QuantityVariance => {
                result.variance_type == VarianceType::Quantity
                    && result.variance_pct.abs() > limits.soft_quantity_variance_pct
            }
            GuardrailId::PartialReceipt => result
                .po_line
                .as_ref()
                .and_then(|po_ref| ctx.received.get(&po_ref.line_num))
                .is_some_and(|received| *received < line.quantity),
            GuardrailId::VendorReliabilityWatch => ctx
                .snapshot
                .vendor
                .reliability_score
                .is_some_and(|score| score < limits.reliability_watch),
            GuardrailId::LargeUnplannedCost => {
                (result.status == MatchStatus::Unplanned
                    || result.variance_type == VarianceType::UnplannedCost)
                    && line.amount.abs().to_f64().unwrap_or_default() >= limits.large_unplanned_amount
            }
        }
    }
}

/// 发票级上下文, 每张发票计算一次
pub struct InvoiceContext<'a> {
    pub snapshot: &'a InvoiceSnapshot,
    pub duplicate_posted: bool,
    pub received: BTreeMap<i32, BigDecimal>,
}

impl<'a> InvoiceContext<'a> {
    pub fn new(snapshot: &'a InvoiceSnapshot) -> Self {
        Self {
            snapshot,
            duplicate_posted: is_duplicate(snapshot),
            received: snapshot.received_by_po_line(),
        }
    }
}

/// 同一供应商已过账过相同发票号, 或相同PO号+金额
fn is_duplicate(snapshot: &InvoiceSnapshot) -> bool {
    let header = &snapshot.header;
    let total = snapshot.total_amount();

    snapshot.posted_history.iter().any(|posted| {
        posted.vendor_id == header.vendor_id
            && (posted.vendor_reference == header.vendor_reference
                || (posted.po_number.is_some()
                    && posted.po_number == header.po_number
                    && posted.total_amount == total))
    })
}

/// 按严重级别分组的触发结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredGuardrails {
    pub hard: Vec<GuardrailId>,
    pub soft: Vec<GuardrailId>,
    pub audit: Vec<GuardrailId>,
}

impl TriggeredGuardrails {
    fn push(&mut self, severity: Severity, id: GuardrailId) {
        let bucket = match severity {
            Severity::Hard => &mut self.hard,
            Severity::Soft => &mut self.soft,
            Severity::Audit => &mut self.audit,
        };
        if !bucket.contains(&id) {
            bucket.push(id);
            bucket.sort();
        }
    }

    /// 全部触发的护栏, 排序去重
    pub fn all(&self) -> Vec<GuardrailId> {
        let mut ids: Vec<GuardrailId> = self
            .hard
            .iter()
            .chain(&self.soft)
            .chain(&self.audit)
            .copied()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.hard.is_empty() && self.soft.is_empty() && self.audit.is_empty()
    }
}

/// 护栏集合 - 进程级只读配置
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailSet {
    definitions: Vec<GuardrailDefinition>,
    limits: GuardrailLimits,
}

impl GuardrailSet {
    pub fn new(definitions: Vec<GuardrailDefinition>, limits: GuardrailLimits) -> Self {
        Self {
            definitions,
            limits,
        }
    }

    /// 标准规则集
    pub fn standard(limits: GuardrailLimits) -> Self {
        let price = format!(
            "Price variance exceeds {}%",
            limits.soft_price_variance_pct
        );
        let quantity = format!(
            "Quantity variance exceeds {}%",
            limits.soft_quantity_variance_pct
        );
        let reliability = format!(
            "Vendor reliability score below {}",
            limits.reliability_watch
        );
        let unplanned = format!(
            "Unplanned cost line of {} or more",
            limits.large_unplanned_amount
        );

        let definitions = vec![
            GuardrailDefinition::new(
                GuardrailId::DuplicatePosting,
                Severity::Hard,
                "Invoice, PO and amount combination already posted",
            ),
            GuardrailDefinition::new(
                GuardrailId::VendorPaymentBlock,
                Severity::Hard,
                "Vendor has an active payment block",
            ),
            GuardrailDefinition::new(
                GuardrailId::InvoicePredatesPo,
                Severity::Hard,
                "Invoice date is before the PO creation date",
            ),
            GuardrailDefinition::new(GuardrailId::PriceVariance, Severity::Soft, price),
            GuardrailDefinition::new(GuardrailId::QuantityVariance, Severity::Soft, quantity),
            GuardrailDefinition::new(
                GuardrailId::PartialReceipt,
                Severity::Soft,
                "Invoiced quantity exceeds quantity received",
            ),
            GuardrailDefinition::new(
                GuardrailId::VendorReliabilityWatch,
                Severity::Audit,
                reliability,
            ),
            GuardrailDefinition::new(GuardrailId::LargeUnplannedCost, Severity::Audit, unplanned),
        ];

        Self::new(definitions, limits)
    }

    pub fn definitions(&self) -> &[GuardrailDefinition] {
        &self.definitions
    }

    pub fn limits(&self) -> &GuardrailLimits {
        &self.limits
    }

    pub fn get(&self, id: GuardrailId) -> Option<&GuardrailDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn severity_of(&self, id: GuardrailId) -> Option<Severity> {
        self.get(id).map(|d| d.severity)
    }

    /// 对单行求值所有规则
    pub fn evaluate_line(
        &self,
        line: &InvoiceLine,
        result: &MatchResult,
        ctx: &InvoiceContext<'_>,
    ) -> TriggeredGuardrails {
        let mut triggered = TriggeredGuardrails::default();
        for def in &self.definitions {
            if def.fires(line, result, ctx, &self.limits) {
                triggered.push(def.severity, def.id);
            }
        }
        triggered
    }

    /// 对整张发票求值, 把触发的护栏写入每行的匹配结果
    ///
    /// `results` 与 `snapshot.lines` 一一对应
    pub fn apply(&self, snapshot: &InvoiceSnapshot, results: Vec<MatchResult>) -> Vec<MatchResult> {
        let ctx = InvoiceContext::new(snapshot);
        snapshot
            .lines
            .iter()
            .zip(results)
            .map(|(line, mut result)| {
                let triggered = self.evaluate_line(line, &result, &ctx);
                if !triggered.is_empty() {
                    tracing::debug!(
                        "Invoice {} line {}: guardrails fired {:?}",
                        line.invoice_id, line.line_num, triggered
                    );
                }
                result.triggered_guardrails = triggered.all();
                result
            })
            .collect()
    }

    /// 按严重级别拆分已记录的护栏; 集合中未定义的护栏返回 Err
    pub fn partition(&self, ids: &[GuardrailId]) -> Result<TriggeredGuardrails, GuardrailId> {
        let mut triggered = TriggeredGuardrails::default();
        for &id in ids {
            let severity = self.severity_of(id).ok_or(id)?;
            triggered.push(severity, id);
        }
        Ok(triggered)
    }
}

impl Default for GuardrailSet {
    fn default() -> Self {
        Self::standard(GuardrailLimits::default())
    }
}

static GLOBAL: OnceLock<Arc<GuardrailSet>> = OnceLock::new();

/// 进程启动时安装护栏集合, 只生效一次; 之后的调用返回已安装的集合
pub fn install(set: GuardrailSet) -> Arc<GuardrailSet> {
    let mut fresh = Some(set);
    let installed = GLOBAL.get_or_init(|| Arc::new(fresh.take().unwrap_or_default()));
    if fresh.is_some() {
        tracing::warn!("Guardrail set already installed, ignoring replacement");
    }
    Arc::clone(installed)
}

/// 当前进程的护栏集合, 未安装时使用标准规则集
pub fn global() -> Arc<GuardrailSet> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(GuardrailSet::default())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        InvoiceHeader, PoLineRef, PostedInvoice, PurchaseOrder, PurchaseOrderLine, VendorProfile,
        GoodsReceiptRecord,
    };
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn snapshot() -> InvoiceSnapshot {
        InvoiceSnapshot {
            header: InvoiceHeader {
                invoice_id: "INV-7".to_string(),
                vendor_id: "V-1".to_string(),
                vendor_reference: "ACME-001".to_string(),
                invoice_date: day(10),
                po_number: Some("PO-7".to_string()),
                currency: "USD".to_string(),
            },
            lines: vec![InvoiceLine {
                invoice_id: "INV-7".to_string(),
                line_num: 1,
                description: "cable".to_string(),
                quantity: "10".parse().unwrap(),
                unit_of_measure: "M".to_string(),
                unit_price: "3".parse().unwrap(),
                amount: "30".parse().unwrap(),
                po_line_ref: Some(10),
                gr_document_ref: None,
                material_code: None,
            }],
            purchase_order: Some(PurchaseOrder {
                po_number: "PO-7".to_string(),
                vendor_id: "V-1".to_string(),
                created_date: day(1),
                lines: vec![PurchaseOrderLine {
                    po_number: "PO-7".to_string(),
                    line_num: 10,
                    description: "cable".to_string(),
                    quantity: "10".parse().unwrap(),
                    unit_price: "3".parse().unwrap(),
                    material_code: None,
                    cost_center: None,
                }],
            }),
            receipts: Vec::new(),
            vendor: VendorProfile::default(),
            posted_history: Vec::new(),
        }
    }

    fn matched() -> MatchResult {
        MatchResult {
            invoice_id: "INV-7".to_string(),
            line_num: 1,
            po_line: Some(PoLineRef {
                po_number: "PO-7".to_string(),
                line_num: 10,
            }),
            strategy: Some(crate::engine::strategy::StrategyId::KeyBased),
            raw_confidence: 100,
            confidence: 100,
            status: MatchStatus::Matched,
            variance_type: VarianceType::None,
            variance_pct: 0.0,
            triggered_guardrails: Vec::new(),
        }
    }

    fn fire(snapshot: &InvoiceSnapshot, result: &MatchResult) -> TriggeredGuardrails {
        let set = GuardrailSet::default();
        let ctx = InvoiceContext::new(snapshot);
        set.evaluate_line(&snapshot.lines[0], result, &ctx)
    }

    #[test]
    fn clean_line_fires_nothing() {
        assert!(fire(&snapshot(), &matched()).is_empty());
    }

    #[test]
    fn duplicate_by_vendor_reference() {
        let mut snap = snapshot();
        snap.posted_history.push(PostedInvoice {
            vendor_id: "V-1".to_string(),
            vendor_reference: "ACME-001".to_string(),
            po_number: None,
            total_amount: "1".parse().unwrap(),
        });
        assert_eq!(fire(&snap, &matched()).hard, vec![GuardrailId::DuplicatePosting]);
    }

    #[test]
    fn duplicate_by_po_and_amount() {
        let mut snap = snapshot();
        snap.posted_history.push(PostedInvoice {
            vendor_id: "V-1".to_string(),
            vendor_reference: "OTHER".to_string(),
            po_number: Some("PO-7".to_string()),
            total_amount: "30.00".parse().unwrap(),
        });
        assert_eq!(fire(&snap, &matched()).hard, vec![GuardrailId::DuplicatePosting]);

        // 其他供应商的同号发票不算重复
        snap.posted_history[0].vendor_id = "V-2".to_string();
        assert!(fire(&snap, &matched()).hard.is_empty());
    }

    #[test]
    fn multiple_hard_rules_fire_together() {
        let mut snap = snapshot();
        snap.vendor.payment_block = true;
        snap.header.invoice_date = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
        let triggered = fire(&snap, &matched());
        assert_eq!(
            triggered.hard,
            vec![GuardrailId::VendorPaymentBlock, GuardrailId::InvoicePredatesPo]
        );
    }

    #[test]
    fn price_variance_over_soft_band() {
        let mut result = matched();
        result.variance_type = VarianceType::Price;
        result.variance_pct = 2.0;
        assert!(fire(&snapshot(), &result).soft.is_empty());

        result.variance_pct = -2.01;
        assert_eq!(fire(&snapshot(), &result).soft, vec![GuardrailId::PriceVariance]);
    }

    #[test]
    fn partial_receipt_needs_a_receipt() {
        let mut snap = snapshot();
        assert!(fire(&snap, &matched()).soft.is_empty());

        snap.receipts.push(GoodsReceiptRecord {
            gr_document: "GR-1".to_string(),
            line_num: 1,
            po_line_num: Some(10),
            received_quantity: "6".parse().unwrap(),
            received_date: day(5),
        });
        assert_eq!(fire(&snap, &matched()).soft, vec![GuardrailId::PartialReceipt]);
    }

    #[test]
    fn audit_rules_are_recorded() {
        let mut snap = snapshot();
        snap.vendor.reliability_score = Some(40);
        snap.lines[0].amount = "25000".parse().unwrap();
        let mut result = matched();
        result.status = MatchStatus::Unplanned;
        result.po_line = None;
        result.strategy = None;
        result.variance_type = VarianceType::UnplannedCost;

        let triggered = fire(&snap, &result);
        assert!(triggered.hard.is_empty());
        assert_eq!(
            triggered.audit,
            vec![GuardrailId::VendorReliabilityWatch, GuardrailId::LargeUnplannedCost]
        );
    }

    #[test]
    fn partition_rejects_unknown_ids() {
        let set = GuardrailSet::new(Vec::new(), GuardrailLimits::default());
        assert_eq!(
            set.partition(&[GuardrailId::PriceVariance]),
            Err(GuardrailId::PriceVariance)
        );
    }

    #[test]
    fn global_set_is_shared() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
