//! 核销引擎
//!
//! 编排一次核销：
//!
//! 1. 支付门控：订单已被流水引用时，同券重放、他券拒绝（不依赖订单仍在订单存储中）；
//!    否则订单必须已验签且金额一致
//! 2. 确定幂等键（支付门控时为 `{gateway}:{transaction_id}`，否则使用客户端提供的键）
//! 3. 幂等快速路径：流水中已有该键则重放原结果
//! 4. 预评估券可用性，不可用直接拒绝
//! 5. 原子提交（锁内重评估 + 守卫式计数 + 追加流水），基础设施瞬时故障按退避策略重试
//! 6. 在订单上标记已消费（尽力而为）

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use coupon_shared::observability::metrics;
use coupon_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{CouponError, Result};
use crate::models::{Coupon, PaymentOrder, PaymentReference, RedemptionRecord, Verdict};
use crate::repository::{CommitOutcome, CommitRequest, CouponStore, RedemptionLedger};
use crate::service::dto::{CollectedPayment, RedeemRequest, RedemptionOutcome, RejectionReason};
use crate::service::payment_gate::PaymentGate;

/// 幂等键最大长度
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// 核销引擎
pub struct RedemptionEngine {
    store: Arc<dyn CouponStore>,
    ledger: Arc<dyn RedemptionLedger>,
    payment_gate: Arc<PaymentGate>,
    retry_policy: RetryPolicy,
}

impl RedemptionEngine {
    pub fn new(
        store: Arc<dyn CouponStore>,
        ledger: Arc<dyn RedemptionLedger>,
        payment_gate: Arc<PaymentGate>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            payment_gate,
            retry_policy,
        }
    }

    /// 核销一张券
    ///
    /// 业务上的不可用以 `Rejected` 返回；只有参数错误和基础设施故障才是 `Err`
    #[instrument(
        skip(self, request),
        fields(coupon_id = %request.coupon_id, actor = %request.actor)
    )]
    pub async fn redeem(&self, request: RedeemRequest) -> Result<RedemptionOutcome> {
        let started = Instant::now();
        let payment_gated = request.collected_payment.is_some();

        let outcome = self.redeem_inner(request).await?;

        metrics::record_redemption(
            outcome.label(),
            payment_gated,
            started.elapsed().as_secs_f64(),
        );
        Ok(outcome)
    }

    async fn redeem_inner(&self, request: RedeemRequest) -> Result<RedemptionOutcome> {
        let actor = request.actor.trim();
        if actor.is_empty() {
            return Err(CouponError::Validation("actor 不能为空".to_string()));
        }

        // 1-2. 支付门控与幂等键
        let (idempotency_key, payment) = match &request.collected_payment {
            Some(collected) => {
                let consumed = self
                    .ledger
                    .find_by_payment(self.payment_gate.gateway_name(), &collected.order_id)
                    .await?;
                if let Some(existing) = consumed {
                    return self
                        .replay_payment(request.coupon_id, collected, existing)
                        .await;
                }
                match self.check_payment(request.coupon_id, collected).await? {
                    Ok(reference) => (reference.idempotency_key(), Some(reference)),
                    Err(reason) => return Ok(RedemptionOutcome::rejected(reason)),
                }
            }
            None => (
                Self::validate_client_key(request.idempotency_key.as_deref())?,
                None,
            ),
        };
        let payment_gated = payment.is_some();

        // 3. 幂等快速路径
        if let Some(existing) = self.ledger.find_by_idempotency_key(&idempotency_key).await? {
            return self.replay(request.coupon_id, existing, payment_gated).await;
        }

        // 4. 预评估
        let now = Utc::now();
        let verdict = match self.store.get_by_id(request.coupon_id).await? {
            None => Verdict::NotFound,
            Some(coupon) => Verdict::evaluate(&coupon, now),
        };
        if let Some(reason) = RejectionReason::from_verdict(&verdict) {
            info!(reason = reason.code(), "券不可核销");
            return Ok(RedemptionOutcome::rejected(reason));
        }

        // 5. 原子提交
        let commit = CommitRequest {
            record_id: Uuid::now_v7(),
            redeemed_by: actor.to_string(),
            location: request.location.clone(),
            notes: request.notes.clone(),
            idempotency_key,
            payment,
            now,
        };

        let coupon_id = request.coupon_id;
        let outcome = retry_with_policy(
            &self.retry_policy,
            "coupon_commit",
            CouponError::is_retryable,
            || self.store.atomic_increment(coupon_id, &commit),
        )
        .await?;

        Ok(match outcome {
            CommitOutcome::Committed { coupon, record } => {
                info!(
                    record_id = %record.id,
                    used_count = coupon.usage.used_count,
                    status = %coupon.status,
                    "券核销成功"
                );
                self.mark_payment_consumed(&record).await;
                Self::committed(&coupon, &record, false)
            }
            CommitOutcome::Replayed { coupon, record } => {
                self.mark_payment_consumed(&record).await;
                Self::committed(&coupon, &record, true)
            }
            CommitOutcome::PreconditionFailed(verdict) => {
                let reason = RejectionReason::from_verdict(&verdict).ok_or_else(|| {
                    CouponError::Internal("提交前置条件失败但券可用".to_string())
                })?;
                info!(reason = reason.code(), "锁内重评估拒绝核销");
                RedemptionOutcome::rejected(reason)
            }
            CommitOutcome::PaymentConsumed { .. } => {
                RedemptionOutcome::rejected(RejectionReason::DuplicatePayment)
            }
            CommitOutcome::IdempotencyConflict { record } => {
                Self::conflict(&record, payment_gated)
            }
        })
    }

    /// 校验代收款项，返回支付引用或拒绝原因
    async fn check_payment(
        &self,
        coupon_id: Uuid,
        collected: &CollectedPayment,
    ) -> Result<std::result::Result<PaymentReference, RejectionReason>> {
        let Some(order) = self.payment_gate.verified_order(&collected.order_id).await? else {
            return Ok(Err(RejectionReason::PaymentNotVerified));
        };

        if let Err(mismatch) = Self::match_order(coupon_id, collected, &order) {
            warn!(order_id = %order.order_id, mismatch, "代收款项与已验签订单不一致");
            return Ok(Err(RejectionReason::PaymentNotVerified));
        }

        let Some(transaction_id) = order.transaction_id.clone() else {
            return Ok(Err(RejectionReason::PaymentNotVerified));
        };

        Ok(Ok(PaymentReference {
            gateway: order.gateway,
            order_id: order.order_id,
            transaction_id,
            amount: order.amount,
        }))
    }

    fn match_order(
        coupon_id: Uuid,
        collected: &CollectedPayment,
        order: &PaymentOrder,
    ) -> std::result::Result<(), &'static str> {
        if order.amount != collected.amount {
            return Err("amount");
        }
        if order.coupon_id.is_some_and(|id| id != coupon_id) {
            return Err("coupon");
        }
        if let Some(txn) = &collected.transaction_id {
            if order.transaction_id.as_deref() != Some(txn.as_str()) {
                return Err("transaction");
            }
        }
        Ok(())
    }

    fn validate_client_key(key: Option<&str>) -> Result<String> {
        let key = key.map(str::trim).unwrap_or_default();
        if key.is_empty() {
            return Err(CouponError::Validation("缺少幂等键".to_string()));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(CouponError::Validation(format!(
                "幂等键长度不能超过 {MAX_IDEMPOTENCY_KEY_LEN}"
            )));
        }
        Ok(key.to_string())
    }

    /// 支付已被流水引用：同一券且款项一致时重放，其他券一律视为重复支付
    async fn replay_payment(
        &self,
        coupon_id: Uuid,
        collected: &CollectedPayment,
        record: RedemptionRecord,
    ) -> Result<RedemptionOutcome> {
        if record.coupon_id != coupon_id {
            return Ok(Self::conflict(&record, true));
        }

        let matches = record.payment_reference.as_ref().is_some_and(|reference| {
            reference.amount == collected.amount
                && collected
                    .transaction_id
                    .as_deref()
                    .is_none_or(|txn| txn == reference.transaction_id)
        });
        if !matches {
            warn!(record_id = %record.id, "代收款项与已核销流水不一致");
            return Ok(RedemptionOutcome::rejected(
                RejectionReason::PaymentNotVerified,
            ));
        }

        self.replay(coupon_id, record, true).await
    }

    /// 键已属于其他券：支付派生的键为重复支付，客户端键为幂等冲突
    fn conflict(record: &RedemptionRecord, payment_gated: bool) -> RedemptionOutcome {
        if payment_gated {
            warn!(other_coupon = %record.coupon_id, "支付已用于其他券的核销");
            RedemptionOutcome::rejected(RejectionReason::DuplicatePayment)
        } else {
            warn!(other_coupon = %record.coupon_id, "幂等键已用于其他券");
            RedemptionOutcome::rejected(RejectionReason::IdempotencyConflict)
        }
    }

    /// 重放流水对应的原结果
    async fn replay(
        &self,
        coupon_id: Uuid,
        record: RedemptionRecord,
        payment_gated: bool,
    ) -> Result<RedemptionOutcome> {
        if record.coupon_id != coupon_id {
            return Ok(Self::conflict(&record, payment_gated));
        }

        let coupon = self
            .store
            .get_by_id(coupon_id)
            .await?
            .ok_or(CouponError::CouponNotFound(coupon_id))?;

        info!(record_id = %record.id, "幂等请求，返回原核销结果");
        Ok(Self::committed(&coupon, &record, true))
    }

    fn committed(coupon: &Coupon, record: &RedemptionRecord, replayed: bool) -> RedemptionOutcome {
        RedemptionOutcome::Committed {
            record_id: record.id,
            used_count: record.used_count_after,
            max_uses: coupon.usage.max_uses,
            remaining_uses: coupon.usage.remaining_after(record.used_count_after),
            replayed,
        }
    }

    async fn mark_payment_consumed(&self, record: &RedemptionRecord) {
        let Some(payment) = &record.payment_reference else {
            return;
        };
        if let Err(e) = self
            .payment_gate
            .mark_consumed(&payment.order_id, record.id)
            .await
        {
            // 流水上的唯一索引已保证防重，这里失败只影响订单上的展示字段
            warn!(order_id = %payment.order_id, error = %e, "标记支付订单已消费失败");
        }
    }

    /// 查询券的核销流水
    pub async fn list_redemptions(
        &self,
        coupon_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RedemptionRecord>> {
        if self.store.get_by_id(coupon_id).await?.is_none() {
            return Err(CouponError::CouponNotFound(coupon_id));
        }
        self.ledger.list_by_coupon(coupon_id, limit.clamp(1, 500)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SandboxGateway;
    use crate::models::{CouponStatus, CouponValue, Usage, Validity};
    use crate::repository::{MemoryPaymentOrderStore, MockCouponStore, MockRedemptionLedger};
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn payment_gate() -> Arc<PaymentGate> {
        Arc::new(PaymentGate::new(
            Arc::new(SandboxGateway::new("key", "secret")),
            Arc::new(MemoryPaymentOrderStore::new()),
            "INR",
        ))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn coupon(id: Uuid) -> Coupon {
        let now = Utc::now();
        Coupon {
            id,
            code: "MOCK1".to_string(),
            title: "mock".to_string(),
            category: "discount".to_string(),
            value: CouponValue::Flat { amount: 100 },
            validity: Validity {
                start_date: now - Duration::days(1),
                end_date: now + Duration::days(1),
            },
            usage: Usage {
                is_unlimited: false,
                max_uses: Some(3),
                used_count: 1,
            },
            status: CouponStatus::Active,
            owner_scope: None,
            qr_token: "qr-mock".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn record(coupon_id: Uuid, key: &str, used_count_after: i32) -> RedemptionRecord {
        RedemptionRecord {
            id: Uuid::new_v4(),
            coupon_id,
            redeemed_by: "partner".to_string(),
            location: None,
            notes: None,
            payment_reference: None,
            idempotency_key: key.to_string(),
            used_count_after,
            created_at: Utc::now(),
        }
    }

    fn request(coupon_id: Uuid, key: Option<&str>) -> RedeemRequest {
        RedeemRequest {
            coupon_id,
            actor: "partner".to_string(),
            idempotency_key: key.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_key_or_actor_is_validation_error() {
        let engine = RedemptionEngine::new(
            Arc::new(MockCouponStore::new()),
            Arc::new(MockRedemptionLedger::new()),
            payment_gate(),
            fast_retry(),
        );
        let id = Uuid::new_v4();

        assert!(matches!(
            engine.redeem(request(id, None)).await,
            Err(CouponError::Validation(_))
        ));
        assert!(matches!(
            engine.redeem(request(id, Some(&"k".repeat(129)))).await,
            Err(CouponError::Validation(_))
        ));

        let mut no_actor = request(id, Some("k1"));
        no_actor.actor = "  ".to_string();
        assert!(matches!(
            engine.redeem(no_actor).await,
            Err(CouponError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_fast_path_replays_without_commit() {
        let id = Uuid::new_v4();
        let mut ledger = MockRedemptionLedger::new();
        let existing = record(id, "k1", 1);
        let expected_record_id = existing.id;
        ledger
            .expect_find_by_idempotency_key()
            .returning(move |_| Ok(Some(existing.clone())));

        let mut store = MockCouponStore::new();
        store
            .expect_get_by_id()
            .returning(move |id| Ok(Some(coupon(id))));
        store.expect_atomic_increment().never();

        let engine =
            RedemptionEngine::new(Arc::new(store), Arc::new(ledger), payment_gate(), fast_retry());
        let outcome = engine.redeem(request(id, Some("k1"))).await.unwrap();

        assert_eq!(
            outcome,
            RedemptionOutcome::Committed {
                record_id: expected_record_id,
                used_count: 1,
                max_uses: Some(3),
                remaining_uses: Some(2),
                replayed: true,
            }
        );
    }

    #[tokio::test]
    async fn test_key_from_other_coupon_is_conflict() {
        let mut ledger = MockRedemptionLedger::new();
        ledger
            .expect_find_by_idempotency_key()
            .returning(|key| Ok(Some(record(Uuid::new_v4(), key, 1))));

        let engine = RedemptionEngine::new(
            Arc::new(MockCouponStore::new()),
            Arc::new(ledger),
            payment_gate(),
            fast_retry(),
        );
        let outcome = engine
            .redeem(request(Uuid::new_v4(), Some("k1")))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RedemptionOutcome::rejected(RejectionReason::IdempotencyConflict)
        );
    }

    #[tokio::test]
    async fn test_transient_commit_failure_is_retried() {
        let id = Uuid::new_v4();
        let mut ledger = MockRedemptionLedger::new();
        ledger.expect_find_by_idempotency_key().returning(|_| Ok(None));

        let mut store = MockCouponStore::new();
        store
            .expect_get_by_id()
            .returning(move |id| Ok(Some(coupon(id))));

        let mut seq = mockall::Sequence::new();
        store
            .expect_atomic_increment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(CouponError::Database(sqlx::Error::PoolTimedOut)));
        store
            .expect_atomic_increment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|coupon_id, req| {
                let mut c = coupon(coupon_id);
                c.usage.used_count = 2;
                Ok(CommitOutcome::Committed {
                    record: req.to_record(coupon_id, 2),
                    coupon: c,
                })
            });

        let engine =
            RedemptionEngine::new(Arc::new(store), Arc::new(ledger), payment_gate(), fast_retry());
        let outcome = engine.redeem(request(id, Some("k2"))).await.unwrap();

        match outcome {
            RedemptionOutcome::Committed {
                used_count,
                remaining_uses,
                replayed,
                ..
            } => {
                assert_eq!(used_count, 2);
                assert_eq!(remaining_uses, Some(1));
                assert!(!replayed);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_business_rejection_is_not_retried() {
        let id = Uuid::new_v4();
        let mut ledger = MockRedemptionLedger::new();
        ledger.expect_find_by_idempotency_key().returning(|_| Ok(None));

        let mut store = MockCouponStore::new();
        store
            .expect_get_by_id()
            .returning(move |id| Ok(Some(coupon(id))));
        store
            .expect_atomic_increment()
            .times(1)
            .returning(|_, _| {
                Ok(CommitOutcome::PreconditionFailed(Verdict::Exhausted {
                    used_count: 3,
                    max_uses: 3,
                }))
            });

        let engine =
            RedemptionEngine::new(Arc::new(store), Arc::new(ledger), payment_gate(), fast_retry());
        let outcome = engine.redeem(request(id, Some("k3"))).await.unwrap();
        assert_eq!(
            outcome,
            RedemptionOutcome::rejected(RejectionReason::Exhausted {
                used_count: 3,
                max_uses: 3
            })
        );
    }

    #[tokio::test]
    async fn test_unverified_payment_is_rejected_before_store() {
        let mut ledger = MockRedemptionLedger::new();
        ledger
            .expect_find_by_payment()
            .withf(|gateway, order_id| gateway == "sandbox" && order_id == "order_unknown")
            .times(1)
            .returning(|_, _| Ok(None));

        let engine = RedemptionEngine::new(
            Arc::new(MockCouponStore::new()),
            Arc::new(ledger),
            payment_gate(),
            fast_retry(),
        );
        let mut req = request(Uuid::new_v4(), None);
        req.collected_payment = Some(CollectedPayment {
            order_id: "order_unknown".to_string(),
            amount: 20_000,
            transaction_id: None,
        });

        let outcome = engine.redeem(req).await.unwrap();
        assert_eq!(
            outcome,
            RedemptionOutcome::rejected(RejectionReason::PaymentNotVerified)
        );
    }
}
