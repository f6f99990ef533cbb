use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 采购订单行 (po_line)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub po_number: String,
    pub line_num: i32,
    pub description: String,
    pub quantity: BigDecimal,           // 订购数量
    pub unit_price: BigDecimal,
    pub material_code: Option<String>,  // 供应商物料编码
    pub cost_center: Option<String>,
}

/// 采购订单抬头 (po_header)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PurchaseOrderHeader {
    pub po_number: String,
    pub vendor_id: String,
    pub created_date: NaiveDate,
}

/// 采购订单及其所有行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub po_number: String,
    pub vendor_id: String,
    pub created_date: NaiveDate,
    pub lines: Vec<PurchaseOrderLine>,
}

impl PurchaseOrder {
    pub fn new(header: PurchaseOrderHeader, lines: Vec<PurchaseOrderLine>) -> Self {
        Self {
            po_number: header.po_number,
            vendor_id: header.vendor_id,
            created_date: header.created_date,
            lines,
        }
    }

    /// 按行号查找PO行
    pub fn line(&self, line_num: i32) -> Option<&PurchaseOrderLine> {
        self.lines.iter().find(|l| l.line_num == line_num)
    }
}
