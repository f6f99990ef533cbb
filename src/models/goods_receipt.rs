use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 收货记录 (gr_record)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct GoodsReceiptRecord {
    pub gr_document: String,
    pub line_num: i32,
    pub po_line_num: Option<i32>,   // 收货过账对应的PO行
    pub received_quantity: BigDecimal,
    pub received_date: NaiveDate,
}
