//! 路由配置模块

use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use coupon_shared::observability::middleware as obs_middleware;

use crate::{handlers, state::AppState};

/// 券相关路由
///
/// 同一位置的路径参数统一命名为 `{id}`，`GET /coupons/{id}` 中它是券码
pub fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/coupons",
            get(handlers::coupon::list_coupons).post(handlers::coupon::issue_coupon),
        )
        .route(
            "/coupons/lookup/{identifier}",
            get(handlers::coupon::lookup),
        )
        .route("/coupons/id/{id}", get(handlers::coupon::get_coupon))
        .route("/coupons/{id}", get(handlers::coupon::lookup_by_code))
        .route(
            "/coupons/{id}/activate",
            post(handlers::coupon::activate_coupon),
        )
        .route(
            "/coupons/{id}/reject",
            post(handlers::coupon::reject_coupon),
        )
        .route(
            "/coupons/{id}/cancel",
            post(handlers::coupon::cancel_coupon),
        )
        .route("/coupons/{id}/redeem", post(handlers::redemption::redeem))
        .route(
            "/coupons/{id}/redemptions",
            get(handlers::redemption::list_redemptions),
        )
}

/// 运维路由，不放在 /coupons 下以免占用券码路径
pub fn admin_routes() -> Router<AppState> {
    Router::new().route(
        "/admin/expire-overdue",
        post(handlers::coupon::expire_overdue),
    )
}

/// 支付相关路由
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/orders", post(handlers::payment::create_order))
        .route(
            "/payments/orders/{order_id}",
            get(handlers::payment::get_order),
        )
        .route("/payments/verify", post(handlers::payment::verify_payment))
}

/// 业务 API 路由（挂载在 /api 下）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(coupon_routes())
        .merge(payment_routes())
        .merge(admin_routes())
}

/// 完整应用：业务路由、探针与中间件
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
