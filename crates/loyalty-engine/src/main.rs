//! 积分引擎服务
//!
//! 启动数据库连接、执行迁移并运行每日重新定级 Worker。

use std::sync::Arc;

use anyhow::Result;
use loyalty_shared::{config::AppConfig, database::Database, observability};
use tokio::signal;
use tracing::{error, info, warn};

use loyalty_engine::{EngineSettings, LoyaltyEngine, Repositories, RequalificationWorker};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/default.toml -> config/{env}.toml -> 环境变量
    let config = AppConfig::load("loyalty-engine").unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化日志与指标
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting loyalty-engine...");
    info!(environment = %config.environment, "Configuration loaded");

    let settings = EngineSettings::try_from(&config.loyalty)?;

    // 3. 数据库连接与迁移
    let db = Database::connect(&config.database).await?;
    let pool = db.pool().clone();
    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database connection established, migrations applied");

    // 4. 装配服务
    let engine = Arc::new(LoyaltyEngine::new(Repositories::postgres(pool), settings));
    let worker = RequalificationWorker::new(
        engine.tiers.clone(),
        engine.redemptions.clone(),
        &config.loyalty.requalification_cron,
    )?;
    info!(
        cron = %config.loyalty.requalification_cron,
        "Requalification worker configured"
    );

    // 5. 运行 Worker 直到收到关闭信号
    tokio::select! {
        _ = worker.run() => {
            warn!("Requalification worker exited");
        }
        _ = shutdown_signal() => {}
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
