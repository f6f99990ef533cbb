pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod report;
pub mod service;

pub use config::AppConfig;
pub use db::create_pool;
pub use engine::{evaluate_invoice, AutopilotThreshold, GuardrailSet};
pub use error::{ConfigError, EngineError, ServiceError};
pub use report::InvoiceReport;
pub use service::AutopilotService;
