use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::{AutopilotThreshold, GuardrailLimits};

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub matching: MatchingConfig,
    pub guardrails: GuardrailLimits,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/accounts_payable".to_string()),
        }
    }
}

/// 匹配配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// 租户默认阈值, 请求可覆盖
    pub autopilot_threshold: AutopilotThreshold,
    /// 候选PO排名返回数量
    pub po_candidate_limit: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            autopilot_threshold: AutopilotThreshold::default(),
            po_candidate_limit: 3,
        }
    }
}

/// CSV 导出配置, 未设置目录时不导出
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    /// 加载配置: autopilot.toml (可选) -> AUTOPILOT__* 环境变量
    ///
    /// 例: AUTOPILOT__MATCHING__AUTOPILOT_THRESHOLD=90
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load("autopilot")
    }

    pub fn load(file_stem: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("AUTOPILOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
