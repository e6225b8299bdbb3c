//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_loyalty_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册积分引擎的业务指标描述
fn describe_loyalty_metrics(service_name: &str) {
    metrics::describe_counter!(
        "loyalty_points_awarded_total",
        "Total number of points awarded"
    );
    metrics::describe_counter!(
        "loyalty_points_redeemed_total",
        "Total number of points redeemed"
    );
    metrics::describe_counter!("loyalty_tier_changes_total", "Total number of tier changes");
    metrics::describe_counter!("loyalty_redemptions_total", "Total number of catalog redemptions");
    metrics::describe_histogram!(
        "loyalty_redemption_duration_seconds",
        "Catalog redemption duration in seconds"
    );
    metrics::describe_counter!(
        "loyalty_perk_redemptions_total",
        "Total number of perk redemptions"
    );
    metrics::describe_counter!(
        "loyalty_requalification_runs_total",
        "Total number of tier requalification sweeps"
    );
    metrics::describe_counter!("loyalty_fraud_flags_total", "Total number of fraud flags raised");
    metrics::describe_gauge!(
        "loyalty_worker_last_run_timestamp",
        "Unix timestamp of the last worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录积分入账
#[inline]
pub fn record_points_awarded(reason: &str, points: i64) {
    metrics::counter!("loyalty_points_awarded_total", "reason" => reason.to_string())
        .increment(points.max(0) as u64);
}

/// 记录积分扣减
#[inline]
pub fn record_points_redeemed(reason: &str, points: i64) {
    metrics::counter!("loyalty_points_redeemed_total", "reason" => reason.to_string())
        .increment(points.max(0) as u64);
}

/// 记录等级变更
#[inline]
pub fn record_tier_change(from: &str, to: &str, reason: &str) {
    metrics::counter!(
        "loyalty_tier_changes_total",
        "from" => from.to_string(),
        "to" => to.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录商品兑换
#[inline]
pub fn record_redemption(item_id: i64, status: &str, duration_secs: f64) {
    metrics::counter!(
        "loyalty_redemptions_total",
        "item_id" => item_id.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "loyalty_redemption_duration_seconds",
        "item_id" => item_id.to_string()
    )
    .record(duration_secs);
}

/// 记录权益（perk）核销
#[inline]
pub fn record_perk_redemption(perk_id: i64, status: &str) {
    metrics::counter!(
        "loyalty_perk_redemptions_total",
        "perk_id" => perk_id.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录重新定级批处理
#[inline]
pub fn record_requalification_run(checked: usize, errors: usize) {
    metrics::counter!(
        "loyalty_requalification_runs_total",
        "outcome" => if errors == 0 { "clean" } else { "partial" }
    )
    .increment(1);
    metrics::gauge!("loyalty_requalification_last_checked").set(checked as f64);
}

/// 记录风控标记
#[inline]
pub fn record_fraud_flag(flag: &str, severity: &str) {
    metrics::counter!(
        "loyalty_fraud_flags_total",
        "flag" => flag.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    metrics::gauge!("loyalty_worker_last_run_timestamp", "worker" => worker.to_string()).set(now);
}
