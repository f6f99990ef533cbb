use crate::error::ServiceError;
use crate::models::{InvoiceSnapshot, PurchaseOrder};
use crate::report::InvoiceReport;
use crate::service::AutopilotService;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 请求体: 内联快照评估
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub snapshot: InvoiceSnapshot,
    pub threshold: Option<i64>,
    #[serde(default)]
    pub candidate_pool: Vec<PurchaseOrder>,
}

/// 请求体: 发票ID列表
#[derive(Debug, Deserialize)]
pub struct BatchEvaluateRequest {
    pub invoice_ids: Vec<String>,
    pub threshold: Option<i64>,
}

/// 响应体
#[derive(Debug, Serialize)]
pub struct BatchEvaluateResponse {
    pub success: bool,
    pub message: String,
    pub reports: Option<Vec<InvoiceReport>>,
}

/// 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = ErrorResponse {
        success: false,
        message,
    };
    (status, Json(body)).into_response()
}

/// 内联快照评估接口
pub async fn evaluate(
    State(service): State<Arc<AutopilotService>>,
    Json(req): Json<EvaluateRequest>,
) -> Response {
    match service.evaluate_snapshot(&req.snapshot, &req.candidate_pool, req.threshold) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) if e.is_config() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::warn!("Invoice {} rejected: {}", req.snapshot.header.invoice_id, e);
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
    }
}

/// 批量评估接口 (从应付数据库加载)
pub async fn batch_evaluate(
    State(service): State<Arc<AutopilotService>>,
    Json(req): Json<BatchEvaluateRequest>,
) -> Response {
    match service.batch_evaluate(&req.invoice_ids, req.threshold).await {
        Ok(reports) => {
            let response = BatchEvaluateResponse {
                success: true,
                message: format!("Successfully evaluated {} invoices", reports.len()),
                reports: Some(reports),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            let status = match &e {
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::Engine(engine) if engine.is_config() => StatusCode::BAD_REQUEST,
                ServiceError::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::error!("Batch evaluation failed: {}", e);
            let response = BatchEvaluateResponse {
                success: false,
                message: format!("Error: {}", e),
                reports: None,
            };
            (status, Json(response)).into_response()
        }
    }
}
