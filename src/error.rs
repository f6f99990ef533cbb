use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::engine::guardrail::GuardrailId;

/// 配置错误 - 调用时即拒绝
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("autopilot threshold {0} is outside [50, 100]")]
    ThresholdOutOfRange(i64),
}

/// 引擎错误: 数据完整性问题和配置问题, 发现即返回, 不做修正
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invoice {invoice_id} line {line_num}: amount {amount} does not match quantity x unit price ({expected})")]
    AmountMismatch {
        invoice_id: String,
        line_num: i32,
        amount: BigDecimal,
        expected: BigDecimal,
    },

    #[error("line {line_num} belongs to invoice {found}, expected {expected}")]
    ForeignLine {
        expected: String,
        found: String,
        line_num: i32,
    },

    #[error("invoice {invoice_id} has duplicate line number {line_num}")]
    DuplicateInvoiceLine { invoice_id: String, line_num: i32 },

    #[error("purchase order {po_number} has duplicate line number {line_num}")]
    DuplicatePoLine { po_number: String, line_num: i32 },

    #[error("invoice {invoice_id} references purchase order {expected} but {found} was supplied")]
    PurchaseOrderMismatch {
        invoice_id: String,
        expected: String,
        found: String,
    },

    #[error("invoice {invoice_id} references purchase order {po_number} but no purchase order data was supplied")]
    MissingPurchaseOrder { invoice_id: String, po_number: String },

    #[error("line {line_num} references PO line {po_number}/{po_line} which is not in the supplied PO lines")]
    UnknownPoLine {
        line_num: i32,
        po_number: String,
        po_line: i32,
    },

    #[error("inconsistent match result for line {line_num}: {reason}")]
    InconsistentMatch { line_num: i32, reason: String },

    #[error("guardrail {0} is not defined")]
    UnknownGuardrail(GuardrailId),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub(crate) fn inconsistent(line_num: i32, reason: impl Into<String>) -> Self {
        Self::InconsistentMatch {
            line_num,
            reason: reason.into(),
        }
    }

    /// 配置类错误 (调用方参数问题)
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// 服务层错误
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("csv export failed: {0}")]
    Export(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invoice {0} not found")]
    NotFound(String),

    #[error("evaluation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Settings(#[from] config::ConfigError),
}
