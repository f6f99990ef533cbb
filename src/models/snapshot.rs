use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{GoodsReceiptRecord, InvoiceHeader, InvoiceLine, PostedInvoice, PurchaseOrder, VendorProfile};

/// 单张发票的完整输入快照 (发票 + PO + 收货 + 供应商上下文)
///
/// 由外部数据源物化, 引擎只读, 不做缓存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub header: InvoiceHeader,
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub purchase_order: Option<PurchaseOrder>,
    #[serde(default)]
    pub receipts: Vec<GoodsReceiptRecord>,
    #[serde(default)]
    pub vendor: VendorProfile,
    #[serde(default)]
    pub posted_history: Vec<PostedInvoice>,
}

impl InvoiceSnapshot {
    /// 发票总金额
    pub fn total_amount(&self) -> BigDecimal {
        self.lines
            .iter()
            .fold(BigDecimal::from(0), |acc, l| acc + &l.amount)
    }

    /// 非PO发票: 抬头没有PO号
    ///
    /// 抬头有PO号但缺少PO数据的快照不算非PO发票, 由完整性校验拒绝
    pub fn is_non_po(&self) -> bool {
        self.header.po_number.is_none()
    }

    /// 按PO行汇总收货数量
    pub fn received_by_po_line(&self) -> BTreeMap<i32, BigDecimal> {
        let mut received: BTreeMap<i32, BigDecimal> = BTreeMap::new();
        for gr in &self.receipts {
            if let Some(po_line) = gr.po_line_num {
                *received.entry(po_line).or_insert_with(|| BigDecimal::from(0)) +=
                    &gr.received_quantity;
            }
        }
        received
    }
}
