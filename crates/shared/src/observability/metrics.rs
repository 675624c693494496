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

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述（出现在 /metrics 的 HELP 注释中）
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("pay_orders_created_total", "Total number of orders created");
    metrics::describe_counter!(
        "pay_notifications_total",
        "Store notifications received, by outcome"
    );
    metrics::describe_counter!(
        "pay_transitions_total",
        "Order state transitions attempted, by event and result"
    );
    metrics::describe_counter!(
        "pay_entitlement_updates_total",
        "VIP window updates, by action"
    );
    metrics::describe_counter!(
        "pay_conflict_retries_total",
        "Compare-and-swap conflicts that triggered a retry"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
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

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录订单创建
#[inline]
pub fn record_order_created(goods_type: &str) {
    metrics::counter!("pay_orders_created_total", "goods_type" => goods_type.to_string())
        .increment(1);
}

/// 记录通知处理结果
#[inline]
pub fn record_notification(outcome: &str) {
    metrics::counter!("pay_notifications_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录状态迁移
#[inline]
pub fn record_transition(event: &str, result: &str) {
    metrics::counter!(
        "pay_transitions_total",
        "event" => event.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// 记录会员窗口变更
#[inline]
pub fn record_entitlement_update(action: &str) {
    metrics::counter!("pay_entitlement_updates_total", "action" => action.to_string())
        .increment(1);
}

/// 记录并发冲突重试
#[inline]
pub fn record_conflict_retry() {
    metrics::counter!("pay_conflict_retries_total").increment(1);
}
