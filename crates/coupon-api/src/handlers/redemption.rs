//! 核销 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use coupon_engine::models::RedemptionRecord;
use coupon_engine::service::RedemptionOutcome;

use crate::{
    dto::{ApiResponse, RedeemBody, RedemptionListQuery},
    error::Result,
    state::AppState,
};

/// 幂等键请求头
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// 核销券
///
/// POST /api/coupons/{id}/redeem
///
/// 不可核销（过期、用尽、支付未验签等）返回 200，`data.status = rejected`
pub async fn redeem(
    State(state): State<AppState>,
    Path(coupon_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RedeemBody>,
) -> Result<Json<ApiResponse<RedemptionOutcome>>> {
    body.validate()?;

    // 请求体中的 idempotencyKey 优先，其次读取 Idempotency-Key 请求头
    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let outcome = state
        .engine
        .redeem(body.into_request(coupon_id, header_key))
        .await?;

    info!(coupon_id = %coupon_id, outcome = outcome.label(), "Redeem request handled");
    Ok(Json(ApiResponse::success(outcome)))
}

/// 券的核销流水
///
/// GET /api/coupons/{id}/redemptions?limit=100
pub async fn list_redemptions(
    State(state): State<AppState>,
    Path(coupon_id): Path<Uuid>,
    Query(query): Query<RedemptionListQuery>,
) -> Result<Json<ApiResponse<Vec<RedemptionRecord>>>> {
    let records = state
        .engine
        .list_redemptions(coupon_id, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(records)))
}
