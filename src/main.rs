use axum::{routing::{get, post}, Router};
use invoice_autopilot::{api, create_pool, engine::guardrail, AppConfig, AutopilotService, GuardrailSet};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env()?;
    info!("Starting server with config: {:?}", config);

    // 护栏集合进程内只加载一次
    let guardrails = guardrail::install(GuardrailSet::standard(config.guardrails.clone()));
    info!("Loaded {} guardrails", guardrails.definitions().len());

    // 创建数据库连接池 (延迟连接)
    let pool = create_pool(&config.database)?;
    info!("Database pool created");

    let service = Arc::new(AutopilotService::new(
        pool,
        guardrails,
        config.matching.clone(),
        config.export.clone(),
    ));

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/autopilot/evaluate", post(api::evaluate))
        .route("/api/autopilot/batch", post(api::batch_evaluate))
        .with_state(service)
        .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/autopilot/evaluate  - evaluate an inline invoice snapshot");
    info!("  POST /api/autopilot/batch     - evaluate invoices from the AP database");
    info!(
        "Default autopilot threshold: {}",
        config.matching.autopilot_threshold
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
