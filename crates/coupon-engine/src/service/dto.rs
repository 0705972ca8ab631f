//! 服务层请求与结果类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CouponValue, InvalidReason, Verdict};

/// 核销请求
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub coupon_id: Uuid,
    /// 执行核销的合作方/操作员，不做身份校验
    pub actor: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    /// 无支付门控时必填
    pub idempotency_key: Option<String>,
    /// 合作方代收的款项，与券面值无关
    pub collected_payment: Option<CollectedPayment>,
}

/// 合作方声明的已收款
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedPayment {
    pub order_id: String,
    /// 声明金额，必须与已验签订单一致
    pub amount: i64,
    /// 提供时必须与订单上记录的支付流水号一致
    pub transaction_id: Option<String>,
}

/// 拒绝原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RejectionReason {
    NotFound,
    Invalid { detail: InvalidReason },
    Expired,
    Exhausted { used_count: i32, max_uses: i32 },
    PaymentNotVerified,
    DuplicatePayment,
    IdempotencyConflict,
}

impl RejectionReason {
    /// 由不可用结论得到拒绝原因，结论可用时返回 None
    pub fn from_verdict(verdict: &Verdict) -> Option<Self> {
        match verdict {
            Verdict::Valid { .. } => None,
            Verdict::NotFound => Some(Self::NotFound),
            Verdict::Invalid { reason } => Some(Self::Invalid { detail: *reason }),
            Verdict::Expired => Some(Self::Expired),
            Verdict::Exhausted {
                used_count,
                max_uses,
            } => Some(Self::Exhausted {
                used_count: *used_count,
                max_uses: *max_uses,
            }),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Invalid { .. } => "invalid",
            Self::Expired => "expired",
            Self::Exhausted { .. } => "exhausted",
            Self::PaymentNotVerified => "payment_not_verified",
            Self::DuplicatePayment => "duplicate_payment",
            Self::IdempotencyConflict => "idempotency_conflict",
        }
    }
}

/// 核销结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RedemptionOutcome {
    Committed {
        record_id: Uuid,
        used_count: i32,
        max_uses: Option<i32>,
        /// 不限次数券为空
        remaining_uses: Option<i32>,
        /// 幂等重放的原结果
        replayed: bool,
    },
    Rejected {
        reason: RejectionReason,
    },
}

impl RedemptionOutcome {
    pub fn rejected(reason: RejectionReason) -> Self {
        Self::Rejected { reason }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Committed {
                replayed: false, ..
            } => "committed",
            Self::Committed { replayed: true, .. } => "replayed",
            Self::Rejected { reason } => reason.code(),
        }
    }
}

/// 券发放请求
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCouponRequest {
    /// 为空时自动生成
    pub code: Option<String>,
    pub title: String,
    pub category: String,
    pub value: CouponValue,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub is_unlimited: bool,
    pub max_uses: Option<i32>,
    pub owner_scope: Option<String>,
    /// 创建后直接激活
    #[serde(default)]
    pub activate: bool,
}

/// 支付下单请求
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// 最小货币单位
    pub amount: i64,
    /// 为空时使用配置的默认币种
    pub currency: Option<String>,
    pub coupon_id: Option<Uuid>,
    pub receipt: String,
}
