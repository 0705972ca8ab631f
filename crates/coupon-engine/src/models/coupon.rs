//! 券实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::CouponStatus;
use crate::error::CouponError;

/// 券面值
///
/// 用枚举标签区分类型，类型与数值不可能不一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouponValue {
    /// 固定金额，最小货币单位（如 paise）
    Flat { amount: i64 },
    /// 百分比折扣，1-100
    Percentage { percent: i32 },
}

impl CouponValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Flat { .. } => "flat",
            Self::Percentage { .. } => "percentage",
        }
    }

    fn raw_amount(&self) -> i64 {
        match self {
            Self::Flat { amount } => *amount,
            Self::Percentage { percent } => i64::from(*percent),
        }
    }

    fn from_raw(kind: &str, amount: i64) -> Result<Self, CouponError> {
        match kind {
            "flat" => Ok(Self::Flat { amount }),
            "percentage" => i32::try_from(amount)
                .map(|percent| Self::Percentage { percent })
                .map_err(|_| CouponError::Internal(format!("非法的百分比面值: {amount}"))),
            other => Err(CouponError::Internal(format!("未知的券面值类型: {other}"))),
        }
    }
}

/// 有效期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Validity {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }

    pub fn is_started_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_date
    }
}

/// 使用次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub is_unlimited: bool,
    /// 不限次数时为空
    pub max_uses: Option<i32>,
    pub used_count: i32,
}

impl Usage {
    pub fn limited(max_uses: i32) -> Self {
        Self {
            is_unlimited: false,
            max_uses: Some(max_uses),
            used_count: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            is_unlimited: true,
            max_uses: None,
            used_count: 0,
        }
    }

    /// 剩余次数，不限次数时为 None
    pub fn remaining(&self) -> Option<i32> {
        self.remaining_after(self.used_count)
    }

    /// 指定已用次数下的剩余次数
    pub fn remaining_after(&self, used_count: i32) -> Option<i32> {
        if self.is_unlimited {
            return None;
        }
        self.max_uses.map(|max| (max - used_count).max(0))
    }

    pub fn is_exhausted(&self) -> bool {
        !self.is_unlimited && self.max_uses.is_none_or(|max| self.used_count >= max)
    }
}

/// 券
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    /// 大写存储，大小写不敏感唯一
    pub code: String,
    pub title: String,
    pub category: String,
    pub value: CouponValue,
    pub validity: Validity,
    pub usage: Usage,
    pub status: CouponStatus,
    pub owner_scope: Option<String>,
    /// 二维码解码后的不透明令牌
    pub qr_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// 一次核销之后的状态
    ///
    /// 有限次数券用到 max_uses 时转为 redeemed
    pub fn status_after_use(&self, used_count: i32) -> CouponStatus {
        match self.usage.max_uses {
            Some(max) if !self.usage.is_unlimited && used_count >= max => CouponStatus::Redeemed,
            _ => self.status,
        }
    }
}

/// 券数据库行
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CouponRow {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub category: String,
    pub value_kind: String,
    pub value_amount: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_unlimited: bool,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub status: CouponStatus,
    pub owner_scope: Option<String>,
    pub qr_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = CouponError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            code: row.code,
            title: row.title,
            category: row.category,
            value: CouponValue::from_raw(&row.value_kind, row.value_amount)?,
            validity: Validity {
                start_date: row.start_date,
                end_date: row.end_date,
            },
            usage: Usage {
                is_unlimited: row.is_unlimited,
                max_uses: row.max_uses,
                used_count: row.used_count,
            },
            status: row.status,
            owner_scope: row.owner_scope,
            qr_token: row.qr_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Coupon {
    /// 面值在数据库中的 (kind, amount) 表示
    pub fn value_columns(&self) -> (&'static str, i64) {
        (self.value.kind(), self.value.raw_amount())
    }
}

/// 券列表查询条件
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponFilter {
    pub status: Option<CouponStatus>,
    pub owner_scope: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl CouponFilter {
    pub fn with_status(status: CouponStatus) -> Self {
        Self {
            status: Some(status),
            limit: default_limit(),
            ..Default::default()
        }
    }

    /// 分页大小限制在 1..=200，非正数取默认值
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            default_limit()
        } else {
            self.limit.min(200)
        }
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }
}
