//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，便于切换存储后端和 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Coupon, CouponFilter, CouponStatus, PaymentOrder, PaymentReference, RedemptionRecord, Verdict,
};

/// 一次核销提交的输入
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// 新流水的 ID，由调用方生成，重试时保持不变
    pub record_id: Uuid,
    pub redeemed_by: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: String,
    pub payment: Option<PaymentReference>,
    /// 提交时刻，用于在锁内重新评估有效期
    pub now: DateTime<Utc>,
}

impl CommitRequest {
    /// 由请求生成待写入的流水
    pub fn to_record(&self, coupon_id: Uuid, used_count_after: i32) -> RedemptionRecord {
        RedemptionRecord {
            id: self.record_id,
            coupon_id,
            redeemed_by: self.redeemed_by.clone(),
            location: self.location.clone(),
            notes: self.notes.clone(),
            payment_reference: self.payment.clone(),
            idempotency_key: self.idempotency_key.clone(),
            used_count_after,
            created_at: self.now,
        }
    }
}

/// 原子提交结果
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// 计数 +1 并写入流水
    Committed {
        coupon: Coupon,
        record: RedemptionRecord,
    },
    /// 同一幂等键已在该券上提交过，返回原流水
    Replayed {
        coupon: Coupon,
        record: RedemptionRecord,
    },
    /// 锁内重新评估不可用
    PreconditionFailed(Verdict),
    /// 该支付已被其他核销引用
    PaymentConsumed { record: RedemptionRecord },
    /// 幂等键已用于其他券
    IdempotencyConflict { record: RedemptionRecord },
}

/// 券存储接口
///
/// used_count 与 status 只能经由这里的守卫更新修改
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// 新建券，券码或二维码令牌冲突时返回 `CodeAlreadyExists`
    async fn create(&self, coupon: &Coupon) -> Result<Coupon>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Coupon>>;

    /// 大小写不敏感
    async fn get_by_code(&self, code: &str) -> Result<Option<Coupon>>;

    async fn get_by_qr_token(&self, qr_token: &str) -> Result<Option<Coupon>>;

    async fn list(&self, filter: &CouponFilter) -> Result<Vec<Coupon>>;

    /// 守卫式状态变更
    ///
    /// 当前状态不在 `allowed_from` 中时返回 `InvalidStatusTransition`，券不存在返回 None
    async fn transition_status(
        &self,
        id: Uuid,
        allowed_from: &[CouponStatus],
        to: CouponStatus,
    ) -> Result<Option<Coupon>>;

    /// 将有效期已过的草稿/激活券标记为 expired，返回处理数量
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64>;

    /// 原子核销提交
    ///
    /// 在同一个锁/事务内完成：幂等检查、可用性重评估、支付去重、守卫式计数更新、追加流水
    async fn atomic_increment(
        &self,
        coupon_id: Uuid,
        request: &CommitRequest,
    ) -> Result<CommitOutcome>;
}

/// 核销流水接口（只读，写入只发生在 `CouponStore::atomic_increment` 中）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedemptionLedger: Send + Sync {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RedemptionRecord>>;

    async fn find_by_payment(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> Result<Option<RedemptionRecord>>;

    async fn list_by_coupon(&self, coupon_id: Uuid, limit: i64) -> Result<Vec<RedemptionRecord>>;

    async fn count_by_coupon(&self, coupon_id: Uuid) -> Result<i64>;
}

/// 支付订单存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentOrderStore: Send + Sync {
    /// 插入新订单，订单号已存在时返回错误
    async fn insert(&self, order: &PaymentOrder) -> Result<()>;

    async fn get(&self, order_id: &str) -> Result<Option<PaymentOrder>>;

    /// 仅当当前值等于 `expected` 时替换为 `updated`
    async fn compare_and_swap(
        &self,
        expected: &PaymentOrder,
        updated: &PaymentOrder,
    ) -> Result<bool>;
}
