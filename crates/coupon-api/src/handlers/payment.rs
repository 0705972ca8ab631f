//! 支付 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use validator::Validate;

use coupon_engine::models::{PaymentOrder, VerificationResult};

use crate::{
    dto::{ApiResponse, CreateOrderBody, VerifyPaymentBody},
    error::Result,
    state::AppState,
};

/// 创建支付订单
///
/// POST /api/payments/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(body): Json<CreateOrderBody>,
) -> Result<Json<ApiResponse<PaymentOrder>>> {
    body.validate()?;
    let order = state.payments.create_order(body.into()).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// 验证支付签名
///
/// POST /api/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(body): Json<VerifyPaymentBody>,
) -> Result<Json<ApiResponse<VerificationResult>>> {
    body.validate()?;
    let result = state
        .payments
        .verify(&body.order_id, &body.verification())
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// 查询订单状态，网关超时后用于轮询
///
/// GET /api/payments/orders/{order_id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentOrder>>> {
    let order = state.payments.order_status(&order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}
