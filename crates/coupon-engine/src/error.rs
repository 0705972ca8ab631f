//! 券服务错误类型
//!
//! 业务规则上的"不可用"（过期、用尽、未生效等）通过 `Verdict` / `RedemptionOutcome`
//! 以类型化结果返回，这里只定义真正的错误。

use thiserror::Error;
use uuid::Uuid;

use coupon_shared::error::{InfraError, is_transient_db_error};

/// 券服务错误类型
#[derive(Debug, Error)]
pub enum CouponError {
    // === 券相关错误 ===
    #[error("券不存在: {0}")]
    CouponNotFound(Uuid),

    #[error("券码已存在: {0}")]
    CodeAlreadyExists(String),

    #[error("券状态不允许此操作: from={from}, to={to}")]
    InvalidStatusTransition { from: String, to: String },

    // === 支付相关错误 ===
    #[error("支付订单不存在: {0}")]
    PaymentOrderNotFound(String),

    #[error("支付订单创建失败: {0}")]
    OrderCreationFailed(String),

    #[error("支付网关超时")]
    GatewayTimeout,

    #[error("支付网关错误: {0}")]
    Gateway(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,
}

/// 券服务 Result 类型别名
pub type Result<T> = std::result::Result<T, CouponError>;

impl CouponError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_db_error(e),
            Self::Redis(_) | Self::ConcurrencyConflict | Self::GatewayTimeout => true,
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Redis(_)
                | Self::Internal(_)
                | Self::ConcurrencyConflict
                | Self::Gateway(_)
                | Self::GatewayTimeout
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CouponNotFound(_) => "COUPON_NOT_FOUND",
            Self::CodeAlreadyExists(_) => "CODE_ALREADY_EXISTS",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::PaymentOrderNotFound(_) => "PAYMENT_ORDER_NOT_FOUND",
            Self::OrderCreationFailed(_) => "ORDER_CREATION_FAILED",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
        }
    }
}

impl From<InfraError> for CouponError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Database(e) => Self::Database(e),
            InfraError::Redis(e) => Self::Redis(e.to_string()),
            InfraError::Serialization(e) => Self::Serialization(e),
            other => Self::Internal(other.to_string()),
        }
    }
}
