//! 响应 DTO 定义

use serde::Serialize;

use coupon_engine::models::Coupon;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 券详情（附带剩余次数）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponDto {
    #[serde(flatten)]
    pub coupon: Coupon,
    /// 不限次数券为空
    pub remaining_uses: Option<i32>,
}

impl From<Coupon> for CouponDto {
    fn from(coupon: Coupon) -> Self {
        Self {
            remaining_uses: coupon.usage.remaining(),
            coupon,
        }
    }
}

/// 列表响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

/// 过期处理结果
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireOverdueResponse {
    pub expired: u64,
}
