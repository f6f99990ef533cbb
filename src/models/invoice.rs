use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::EngineError;

/// 金额校验容差 (0.01 货币单位)
pub const AMOUNT_TOLERANCE: &str = "0.01";

/// 发票抬头 (ap_invoice)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub invoice_id: String,
    pub vendor_id: String,
    pub vendor_reference: String,      // 供应商自己的发票号
    pub invoice_date: NaiveDate,
    pub po_number: Option<String>,     // 引用的采购订单, 非PO发票为空
    pub currency: String,
}

/// 发票明细行 (ap_invoice_line)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub invoice_id: String,
    pub line_num: i32,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_of_measure: String,
    pub unit_price: BigDecimal,
    pub amount: BigDecimal,
    pub po_line_ref: Option<i32>,         // 引用的PO行号
    pub gr_document_ref: Option<String>,  // 引用的收货凭证
    pub material_code: Option<String>,    // 供应商物料编码
}

impl InvoiceLine {
    /// 校验 amount == round(quantity * unit_price, 2), 容差 0.01
    pub fn check_amount(&self) -> Result<(), EngineError> {
        let tolerance = BigDecimal::from_str(AMOUNT_TOLERANCE).unwrap_or_default();
        let expected = (&self.quantity * &self.unit_price).round(2);
        let diff = (&self.amount - &expected).abs();

        if diff > tolerance {
            return Err(EngineError::AmountMismatch {
                invoice_id: self.invoice_id.clone(),
                line_num: self.line_num,
                amount: self.amount.clone(),
                expected,
            });
        }

        Ok(())
    }
}

/// 已过账发票 - 用于重复过账检查
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PostedInvoice {
    pub vendor_id: String,
    pub vendor_reference: String,
    pub po_number: Option<String>,
    pub total_amount: BigDecimal,
}
