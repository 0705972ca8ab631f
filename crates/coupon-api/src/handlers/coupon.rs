//! 券查询与管理 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use coupon_engine::models::{CouponFilter, Verdict};

use crate::{
    dto::{ApiResponse, CouponDto, ExpireOverdueResponse, IssueCouponBody, ListResponse},
    error::Result,
    state::AppState,
};

/// 查询并校验券（券码或二维码令牌）
///
/// GET /api/coupons/lookup/{identifier}
pub async fn lookup(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<ApiResponse<Verdict>>> {
    let verdict = state.lookup.classify(&identifier).await?;
    Ok(Json(ApiResponse::success(verdict)))
}

/// 按券码查询校验
///
/// GET /api/coupons/{code}
pub async fn lookup_by_code(
    state: State<AppState>,
    identifier: Path<String>,
) -> Result<Json<ApiResponse<Verdict>>> {
    lookup(state, identifier).await
}

/// 创建券
///
/// POST /api/coupons
pub async fn issue_coupon(
    State(state): State<AppState>,
    Json(body): Json<IssueCouponBody>,
) -> Result<Json<ApiResponse<CouponDto>>> {
    body.validate()?;

    let coupon = state.issuance.issue(body.into()).await?;
    info!(coupon_id = %coupon.id, code = %coupon.code, "Coupon issued");

    Ok(Json(ApiResponse::success_with_message(
        coupon.into(),
        "券已创建",
    )))
}

/// 获取券详情
///
/// GET /api/coupons/id/{id}
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponDto>>> {
    let coupon = state.issuance.get(id).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

/// 券列表
///
/// GET /api/coupons?status=active&ownerScope=ngo-1&limit=50&offset=0
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(filter): Query<CouponFilter>,
) -> Result<Json<ApiResponse<ListResponse<CouponDto>>>> {
    let coupons = state.issuance.list(&filter).await?;
    Ok(Json(ApiResponse::success(ListResponse {
        items: coupons.into_iter().map(CouponDto::from).collect(),
        limit: filter.effective_limit(),
        offset: filter.effective_offset(),
    })))
}

/// 激活券
///
/// POST /api/coupons/{id}/activate
pub async fn activate_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponDto>>> {
    let coupon = state.issuance.activate(id).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

/// 驳回券
///
/// POST /api/coupons/{id}/reject
pub async fn reject_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponDto>>> {
    let coupon = state.issuance.reject(id).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

/// 作废券
///
/// POST /api/coupons/{id}/cancel
pub async fn cancel_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponDto>>> {
    let coupon = state.issuance.cancel(id).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

/// 将有效期已过的券标记为 expired
///
/// POST /api/admin/expire-overdue
pub async fn expire_overdue(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ExpireOverdueResponse>>> {
    let expired = state.issuance.expire_overdue(Utc::now()).await?;
    Ok(Json(ApiResponse::success(ExpireOverdueResponse { expired })))
}
