//! 内存存储
//!
//! 基于 DashMap 的进程内实现，契约与 PostgreSQL/Redis 实现一致，用于开发环境和测试。
//! 核销提交在券条目的写锁内完成，临界区内没有 await。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{CommitOutcome, CommitRequest, CouponStore, PaymentOrderStore, RedemptionLedger};
use crate::error::{CouponError, Result};
use crate::models::{Coupon, CouponFilter, CouponStatus, PaymentOrder, RedemptionRecord, Verdict};

/// 流水及其唯一索引
#[derive(Debug, Default)]
struct LedgerIndex {
    records: Vec<RedemptionRecord>,
    by_key: HashMap<String, usize>,
    by_payment: HashMap<(String, String), usize>,
}

impl LedgerIndex {
    fn append(&mut self, record: RedemptionRecord) {
        let idx = self.records.len();
        self.by_key.insert(record.idempotency_key.clone(), idx);
        if let Some(payment) = &record.payment_reference {
            self.by_payment
                .insert((payment.gateway.clone(), payment.order_id.clone()), idx);
        }
        self.records.push(record);
    }

    fn find_by_key(&self, key: &str) -> Option<&RedemptionRecord> {
        self.by_key.get(key).map(|&idx| &self.records[idx])
    }

    fn find_by_payment(&self, gateway: &str, order_id: &str) -> Option<&RedemptionRecord> {
        self.by_payment
            .get(&(gateway.to_string(), order_id.to_string()))
            .map(|&idx| &self.records[idx])
    }
}

/// 内存券存储，同时提供核销流水查询
#[derive(Debug, Clone, Default)]
pub struct MemoryCouponStore {
    coupons: Arc<DashMap<Uuid, Coupon>>,
    codes: Arc<DashMap<String, Uuid>>,
    qr_tokens: Arc<DashMap<String, Uuid>>,
    ledger: Arc<Mutex<LedgerIndex>>,
}

impl MemoryCouponStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 券数量
    pub fn len(&self) -> usize {
        self.coupons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coupons.is_empty()
    }

    fn lookup_index(&self, index: &DashMap<String, Uuid>, key: &str) -> Option<Coupon> {
        let id = *index.get(key)?;
        self.coupons.get(&id).map(|c| c.clone())
    }
}

#[async_trait]
impl CouponStore for MemoryCouponStore {
    async fn create(&self, coupon: &Coupon) -> Result<Coupon> {
        let code = coupon.code.to_uppercase();

        match self.codes.entry(code.clone()) {
            Entry::Occupied(_) => Err(CouponError::CodeAlreadyExists(code)),
            Entry::Vacant(code_slot) => {
                let Entry::Vacant(qr_slot) = self.qr_tokens.entry(coupon.qr_token.clone()) else {
                    return Err(CouponError::CodeAlreadyExists(code));
                };

                // 券先落地，索引后公开：能查到索引就一定能查到券
                let mut stored = coupon.clone();
                stored.code = code;
                self.coupons.insert(stored.id, stored.clone());
                qr_slot.insert(stored.id);
                code_slot.insert(stored.id);
                Ok(stored)
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Coupon>> {
        Ok(self.coupons.get(&id).map(|c| c.clone()))
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.lookup_index(&self.codes, &code.to_uppercase()))
    }

    async fn get_by_qr_token(&self, qr_token: &str) -> Result<Option<Coupon>> {
        Ok(self.lookup_index(&self.qr_tokens, qr_token))
    }

    async fn list(&self, filter: &CouponFilter) -> Result<Vec<Coupon>> {
        let mut coupons: Vec<Coupon> = self
            .coupons
            .iter()
            .filter(|c| filter.status.is_none_or(|s| c.status == s))
            .filter(|c| {
                filter
                    .owner_scope
                    .as_ref()
                    .is_none_or(|scope| c.owner_scope.as_ref() == Some(scope))
            })
            .filter(|c| filter.category.as_ref().is_none_or(|cat| &c.category == cat))
            .map(|c| c.clone())
            .collect();

        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(coupons
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        allowed_from: &[CouponStatus],
        to: CouponStatus,
    ) -> Result<Option<Coupon>> {
        let Some(mut coupon) = self.coupons.get_mut(&id) else {
            return Ok(None);
        };

        if !allowed_from.contains(&coupon.status) {
            return Err(CouponError::InvalidStatusTransition {
                from: coupon.status.to_string(),
                to: to.to_string(),
            });
        }

        coupon.status = to;
        coupon.updated_at = Utc::now();
        Ok(Some(coupon.clone()))
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut expired = 0;
        for mut coupon in self.coupons.iter_mut() {
            if matches!(coupon.status, CouponStatus::Draft | CouponStatus::Active)
                && coupon.validity.is_expired_at(now)
            {
                coupon.status = CouponStatus::Expired;
                coupon.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn atomic_increment(
        &self,
        coupon_id: Uuid,
        request: &CommitRequest,
    ) -> Result<CommitOutcome> {
        // 券条目写锁 -> 流水锁，固定加锁顺序
        let Some(mut coupon) = self.coupons.get_mut(&coupon_id) else {
            return Ok(CommitOutcome::PreconditionFailed(Verdict::NotFound));
        };
        let mut ledger = self.ledger.lock();

        if let Some(existing) = ledger.find_by_key(&request.idempotency_key) {
            let record = existing.clone();
            return Ok(if record.coupon_id == coupon_id {
                CommitOutcome::Replayed {
                    coupon: coupon.clone(),
                    record,
                }
            } else {
                CommitOutcome::IdempotencyConflict { record }
            });
        }

        let verdict = Verdict::evaluate(&coupon, request.now);
        if !verdict.is_valid() {
            return Ok(CommitOutcome::PreconditionFailed(verdict));
        }

        if let Some(payment) = &request.payment {
            if let Some(existing) = ledger.find_by_payment(&payment.gateway, &payment.order_id) {
                return Ok(CommitOutcome::PaymentConsumed {
                    record: existing.clone(),
                });
            }
        }

        let used_count = coupon.usage.used_count + 1;
        coupon.status = coupon.status_after_use(used_count);
        coupon.usage.used_count = used_count;
        coupon.updated_at = Utc::now();

        let record = request.to_record(coupon_id, used_count);
        ledger.append(record.clone());

        Ok(CommitOutcome::Committed {
            coupon: coupon.clone(),
            record,
        })
    }
}

#[async_trait]
impl RedemptionLedger for MemoryCouponStore {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RedemptionRecord>> {
        Ok(self.ledger.lock().find_by_key(key).cloned())
    }

    async fn find_by_payment(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> Result<Option<RedemptionRecord>> {
        Ok(self.ledger.lock().find_by_payment(gateway, order_id).cloned())
    }

    async fn list_by_coupon(&self, coupon_id: Uuid, limit: i64) -> Result<Vec<RedemptionRecord>> {
        let ledger = self.ledger.lock();
        Ok(ledger
            .records
            .iter()
            .filter(|r| r.coupon_id == coupon_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_by_coupon(&self, coupon_id: Uuid) -> Result<i64> {
        let ledger = self.ledger.lock();
        Ok(ledger
            .records
            .iter()
            .filter(|r| r.coupon_id == coupon_id)
            .count() as i64)
    }
}

/// 内存支付订单存储
#[derive(Debug, Clone, Default)]
pub struct MemoryPaymentOrderStore {
    orders: Arc<DashMap<String, PaymentOrder>>,
}

impl MemoryPaymentOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentOrderStore for MemoryPaymentOrderStore {
    async fn insert(&self, order: &PaymentOrder) -> Result<()> {
        match self.orders.entry(order.order_id.clone()) {
            Entry::Occupied(_) => Err(CouponError::Internal(format!(
                "支付订单号重复: {}",
                order.order_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        Ok(self.orders.get(order_id).map(|o| o.clone()))
    }

    async fn compare_and_swap(
        &self,
        expected: &PaymentOrder,
        updated: &PaymentOrder,
    ) -> Result<bool> {
        let Some(mut current) = self.orders.get_mut(&expected.order_id) else {
            return Ok(false);
        };
        if *current != *expected {
            return Ok(false);
        }
        *current = updated.clone();
        Ok(true)
    }
}
