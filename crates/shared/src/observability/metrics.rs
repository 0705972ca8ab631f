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

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出，并在 metrics_port 上暴露 `/metrics`
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("coupon_lookups_total", "Coupon lookups by verdict");
    metrics::describe_counter!("coupons_issued_total", "Coupons created");
    metrics::describe_counter!(
        "coupon_status_transitions_total",
        "Coupon lifecycle transitions"
    );

    metrics::describe_counter!("redemptions_total", "Redemption attempts by outcome");
    metrics::describe_histogram!(
        "redemption_duration_seconds",
        "Redemption duration in seconds"
    );

    metrics::describe_counter!("payment_orders_total", "Payment orders created");
    metrics::describe_counter!(
        "payment_verifications_total",
        "Payment signature verifications by result"
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

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

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

/// 记录券查询结论
#[inline]
pub fn record_lookup(verdict: &str) {
    metrics::counter!("coupon_lookups_total", "verdict" => verdict.to_string()).increment(1);
}

/// 记录券创建
#[inline]
pub fn record_coupon_issued(category: &str) {
    metrics::counter!("coupons_issued_total", "category" => category.to_string()).increment(1);
}

/// 记录生命周期状态变更
#[inline]
pub fn record_status_transition(to: &str) {
    metrics::counter!("coupon_status_transitions_total", "to" => to.to_string()).increment(1);
}

/// 记录核销
///
/// outcome 取 committed / replayed / 拒绝原因码。
#[inline]
pub fn record_redemption(outcome: &str, payment_gated: bool, duration_secs: f64) {
    metrics::counter!(
        "redemptions_total",
        "outcome" => outcome.to_string(),
        "payment_gated" => payment_gated.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "redemption_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录支付订单创建
#[inline]
pub fn record_payment_order(gateway: &str, status: &str) {
    metrics::counter!(
        "payment_orders_total",
        "gateway" => gateway.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录支付验签结果
#[inline]
pub fn record_payment_verification(gateway: &str, verified: bool) {
    metrics::counter!(
        "payment_verifications_total",
        "gateway" => gateway.to_string(),
        "verified" => verified.to_string()
    )
    .increment(1);
}
