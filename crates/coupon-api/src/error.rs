//! HTTP 错误类型
//!
//! 业务拒绝（过期、用尽、支付未验签等）以 200 + 类型化结果返回，不经过这里。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use coupon_engine::CouponError;
use coupon_shared::error::InfraError;

/// API 错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("券不存在: {0}")]
    CouponNotFound(Uuid),
    #[error("支付订单不存在: {0}")]
    PaymentOrderNotFound(String),

    #[error("券码已存在: {0}")]
    CodeAlreadyExists(String),
    #[error("券状态不允许此操作: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },
    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    #[error("支付订单创建失败: {0}")]
    OrderCreationFailed(String),
    #[error("支付网关超时，请查询订单状态后再决定是否重新下单")]
    GatewayTimeout,

    #[error("数据库错误: {0}")]
    Database(String),
    #[error("Redis错误: {0}")]
    Redis(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::CouponNotFound(_) | Self::PaymentOrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::CodeAlreadyExists(_)
            | Self::InvalidStatusTransition { .. }
            | Self::ConcurrencyConflict => StatusCode::CONFLICT,
            Self::OrderCreationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_) | Self::Redis(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CouponNotFound(_) => "COUPON_NOT_FOUND",
            Self::PaymentOrderNotFound(_) => "PAYMENT_ORDER_NOT_FOUND",
            Self::CodeAlreadyExists(_) => "CODE_ALREADY_EXISTS",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::OrderCreationFailed(_) => "ORDER_CREATION_FAILED",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息记录日志
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Redis(e) => {
                tracing::error!(error = %e, "Redis 操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<CouponError> for ApiError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::CouponNotFound(id) => Self::CouponNotFound(id),
            CouponError::CodeAlreadyExists(code) => Self::CodeAlreadyExists(code),
            CouponError::InvalidStatusTransition { from, to } => {
                Self::InvalidStatusTransition { from, to }
            }
            CouponError::PaymentOrderNotFound(id) => Self::PaymentOrderNotFound(id),
            CouponError::OrderCreationFailed(msg) => Self::OrderCreationFailed(msg),
            CouponError::GatewayTimeout => Self::GatewayTimeout,
            CouponError::Gateway(msg) => Self::OrderCreationFailed(msg),
            CouponError::Validation(msg) => Self::Validation(msg),
            CouponError::ConcurrencyConflict => Self::ConcurrencyConflict,
            CouponError::Database(e) => Self::Database(e.to_string()),
            CouponError::Redis(msg) => Self::Redis(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<InfraError> for ApiError {
    fn from(err: InfraError) -> Self {
        CouponError::from(err).into()
    }
}

/// API 层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;
