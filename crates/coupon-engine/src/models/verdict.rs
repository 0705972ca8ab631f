//! 券可用性结论
//!
//! 业务规则上的不可用都以 `Verdict` 表达，只有基础设施故障才是错误。
//! 查询接口与存储层的原子提交共用同一套判定逻辑。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::coupon::Coupon;
use super::enums::CouponStatus;

/// 不可用原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// 标识符格式非法
    Malformed,
    /// 草稿，尚未激活
    Inactive,
    Rejected,
    Cancelled,
    /// 未到生效时间
    NotYetValid,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Inactive => "inactive",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::NotYetValid => "not_yet_valid",
        }
    }
}

/// 券可用性结论
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Verdict {
    NotFound,
    Invalid { reason: InvalidReason },
    Expired,
    Exhausted { used_count: i32, max_uses: i32 },
    Valid { coupon: Box<Coupon> },
}

impl Verdict {
    /// 在给定时刻评估券的可用性
    ///
    /// 判定顺序：过期优先（无论存储状态），其次驳回/作废、草稿、用尽、未生效。
    pub fn evaluate(coupon: &Coupon, now: DateTime<Utc>) -> Self {
        if coupon.status == CouponStatus::Expired || coupon.validity.is_expired_at(now) {
            return Self::Expired;
        }

        match coupon.status {
            CouponStatus::Rejected => {
                return Self::Invalid {
                    reason: InvalidReason::Rejected,
                };
            }
            CouponStatus::Cancelled => {
                return Self::Invalid {
                    reason: InvalidReason::Cancelled,
                };
            }
            CouponStatus::Draft => {
                return Self::Invalid {
                    reason: InvalidReason::Inactive,
                };
            }
            _ => {}
        }

        if coupon.status == CouponStatus::Redeemed || coupon.usage.is_exhausted() {
            let max_uses = coupon.usage.max_uses.unwrap_or(coupon.usage.used_count);
            return Self::Exhausted {
                used_count: coupon.usage.used_count,
                max_uses,
            };
        }

        if !coupon.validity.is_started_at(now) {
            return Self::Invalid {
                reason: InvalidReason::NotYetValid,
            };
        }

        Self::Valid {
            coupon: Box::new(coupon.clone()),
        }
    }

    pub fn malformed() -> Self {
        Self::Invalid {
            reason: InvalidReason::Malformed,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// 指标与日志使用的短标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Invalid { .. } => "invalid",
            Self::Expired => "expired",
            Self::Exhausted { .. } => "exhausted",
            Self::Valid { .. } => "valid",
        }
    }
}
