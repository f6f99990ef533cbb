use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 供应商档案 (vendor_master)
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize, Deserialize)]
pub struct VendorProfile {
    pub payment_block: bool,
    pub reliability_score: Option<i32>,  // 0-100
}
