//! 服务运行时

use keystone_config::AppConfig;
use keystone_errors::{AppError, AppResult};
use keystone_telemetry::{PrometheusHandle, init_metrics, init_tracing, init_tracing_json};
use tracing::{error, info};

/// 服务运行时配置
pub struct RuntimeConfig {
    pub config_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_dir: "config".to_string(),
        }
    }
}

/// 加载配置：先读取 `.env`（存在时），再按目录加载
pub fn load_config(runtime: &RuntimeConfig) -> AppResult<AppConfig> {
    dotenvy::dotenv().ok();
    AppConfig::load(&runtime.config_dir).map_err(|e| AppError::internal(e.to_string()))
}

/// 初始化服务运行时
///
/// 生产环境或显式开启 `telemetry.json` 时输出 JSON 日志；
/// 开启 `telemetry.metrics` 时返回 Prometheus handle
pub fn init_runtime(config: &AppConfig) -> AppResult<Option<PrometheusHandle>> {
    let tracing_result = if config.is_production() || config.telemetry.json {
        init_tracing_json(&config.telemetry.log_level)
    } else {
        init_tracing(&config.telemetry.log_level)
    };
    tracing_result.map_err(|e| AppError::internal(e.to_string()))?;

    let metrics = if config.telemetry.metrics {
        Some(init_metrics().map_err(|e| AppError::internal(e.to_string()))?)
    } else {
        None
    };

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        metrics = metrics.is_some(),
        "Runtime initialized"
    );
    Ok(metrics)
}

/// 等待关闭信号
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
