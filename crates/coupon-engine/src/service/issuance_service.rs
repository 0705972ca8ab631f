//! 券发放与生命周期管理
//!
//! 创建券、激活、驳回、作废，以及把过期券标记为 expired。
//! 计数相关字段只在核销提交中变化，这里不触碰。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use coupon_shared::observability::metrics;

use crate::error::{CouponError, Result};
use crate::models::{Coupon, CouponFilter, CouponStatus, CouponValue, Usage, Validity};
use crate::repository::CouponStore;
use crate::service::dto::IssueCouponRequest;
use crate::service::lookup_service::sanitize_identifier;

/// 自动生成券码的字符集（去掉易混淆的 0/O/1/I）
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const GENERATED_CODE_LEN: usize = 10;
const MAX_CODE_ATTEMPTS: usize = 3;

/// 生成随机券码
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..GENERATED_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// 生成二维码令牌
pub fn generate_qr_token() -> String {
    format!("qr_{}", Uuid::new_v4().simple())
}

/// 券发放服务
pub struct IssuanceService {
    store: Arc<dyn CouponStore>,
}

impl IssuanceService {
    pub fn new(store: Arc<dyn CouponStore>) -> Self {
        Self { store }
    }

    /// 创建券
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn issue(&self, request: IssueCouponRequest) -> Result<Coupon> {
        Self::validate(&request)?;

        let explicit_code = match request.code.as_deref() {
            Some(code) => Some(
                sanitize_identifier(code)
                    .ok_or_else(|| CouponError::Validation("券码格式非法".to_string()))?
                    .to_uppercase(),
            ),
            None => None,
        };

        let usage = if request.is_unlimited {
            Usage::unlimited()
        } else {
            // validate 已保证有值
            Usage::limited(request.max_uses.unwrap_or(1))
        };

        let attempts = if explicit_code.is_some() {
            1
        } else {
            MAX_CODE_ATTEMPTS
        };

        for attempt in 0..attempts {
            let now = Utc::now();
            let coupon = Coupon {
                id: Uuid::now_v7(),
                code: explicit_code.clone().unwrap_or_else(generate_code),
                title: request.title.trim().to_string(),
                category: request.category.trim().to_string(),
                value: request.value,
                validity: Validity {
                    start_date: request.start_date,
                    end_date: request.end_date,
                },
                usage,
                status: if request.activate {
                    CouponStatus::Active
                } else {
                    CouponStatus::Draft
                },
                owner_scope: request.owner_scope.clone(),
                qr_token: generate_qr_token(),
                created_at: now,
                updated_at: now,
            };

            match self.store.create(&coupon).await {
                Ok(created) => {
                    metrics::record_coupon_issued(&created.category);
                    info!(coupon_id = %created.id, code = %created.code, "券已创建");
                    return Ok(created);
                }
                Err(CouponError::CodeAlreadyExists(code))
                    if explicit_code.is_none() && attempt + 1 < attempts =>
                {
                    warn!(code = %code, "自动生成的券码冲突，重新生成");
                }
                Err(e) => return Err(e),
            }
        }

        Err(CouponError::Internal("券码生成多次冲突".to_string()))
    }

    fn validate(request: &IssueCouponRequest) -> Result<()> {
        if request.title.trim().is_empty() {
            return Err(CouponError::Validation("标题不能为空".to_string()));
        }
        if request.category.trim().is_empty() {
            return Err(CouponError::Validation("分类不能为空".to_string()));
        }
        if request.end_date <= request.start_date {
            return Err(CouponError::Validation("结束时间必须晚于开始时间".to_string()));
        }
        match request.value {
            CouponValue::Flat { amount } if amount <= 0 => {
                return Err(CouponError::Validation("固定金额必须大于 0".to_string()));
            }
            CouponValue::Percentage { percent } if !(1..=100).contains(&percent) => {
                return Err(CouponError::Validation("折扣百分比必须在 1-100 之间".to_string()));
            }
            _ => {}
        }
        if !request.is_unlimited && request.max_uses.is_none_or(|max| max < 1) {
            return Err(CouponError::Validation(
                "有限次数券的 maxUses 必须大于等于 1".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Coupon> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or(CouponError::CouponNotFound(id))
    }

    pub async fn list(&self, filter: &CouponFilter) -> Result<Vec<Coupon>> {
        self.store.list(filter).await
    }

    /// 激活：draft -> active，已过有效期的券不能激活
    pub async fn activate(&self, id: Uuid) -> Result<Coupon> {
        let coupon = self.get(id).await?;
        if coupon.validity.is_expired_at(Utc::now()) {
            return Err(CouponError::InvalidStatusTransition {
                from: CouponStatus::Expired.to_string(),
                to: CouponStatus::Active.to_string(),
            });
        }
        self.transition(id, &[CouponStatus::Draft], CouponStatus::Active)
            .await
    }

    /// 驳回：draft | active -> rejected
    pub async fn reject(&self, id: Uuid) -> Result<Coupon> {
        self.transition(
            id,
            &[CouponStatus::Draft, CouponStatus::Active],
            CouponStatus::Rejected,
        )
        .await
    }

    /// 作废：draft | active -> cancelled
    pub async fn cancel(&self, id: Uuid) -> Result<Coupon> {
        self.transition(
            id,
            &[CouponStatus::Draft, CouponStatus::Active],
            CouponStatus::Cancelled,
        )
        .await
    }

    /// 把已过有效期的草稿/激活券标记为 expired
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let count = self.store.expire_overdue(now).await?;
        if count > 0 {
            info!(count, "已标记过期券");
        }
        Ok(count)
    }

    #[instrument(skip(self, allowed_from))]
    async fn transition(
        &self,
        id: Uuid,
        allowed_from: &[CouponStatus],
        to: CouponStatus,
    ) -> Result<Coupon> {
        let coupon = self
            .store
            .transition_status(id, allowed_from, to)
            .await?
            .ok_or(CouponError::CouponNotFound(id))?;

        metrics::record_status_transition(to.as_str());
        info!(coupon_id = %id, status = %to, "券状态已变更");
        Ok(coupon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryCouponStore, MockCouponStore};
    use chrono::Duration;

    fn request() -> IssueCouponRequest {
        let now = Utc::now();
        IssueCouponRequest {
            code: None,
            title: "Free meal".to_string(),
            category: "food".to_string(),
            value: CouponValue::Flat { amount: 20_000 },
            start_date: now - Duration::hours(1),
            end_date: now + Duration::days(7),
            is_unlimited: false,
            max_uses: Some(2),
            owner_scope: Some("ngo-1".to_string()),
            activate: false,
        }
    }

    #[test]
    fn test_generate_code() {
        let code = generate_code();
        assert_eq!(code.len(), GENERATED_CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert!(generate_qr_token().starts_with("qr_"));
    }

    #[tokio::test]
    async fn test_issue_draft_then_activate() {
        let service = IssuanceService::new(Arc::new(MemoryCouponStore::new()));
        let coupon = service.issue(request()).await.unwrap();
        assert_eq!(coupon.status, CouponStatus::Draft);
        assert_eq!(coupon.usage.max_uses, Some(2));
        assert_eq!(coupon.usage.used_count, 0);

        let active = service.activate(coupon.id).await.unwrap();
        assert_eq!(active.status, CouponStatus::Active);

        let err = service.activate(coupon.id).await.unwrap_err();
        assert!(matches!(err, CouponError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_explicit_code_is_normalized_and_unique() {
        let service = IssuanceService::new(Arc::new(MemoryCouponStore::new()));
        let mut req = request();
        req.code = Some(" diwali-25 ".to_string());
        let coupon = service.issue(req.clone()).await.unwrap();
        assert_eq!(coupon.code, "DIWALI-25");

        assert!(matches!(
            service.issue(req).await,
            Err(CouponError::CodeAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_unlimited_ignores_max_uses() {
        let service = IssuanceService::new(Arc::new(MemoryCouponStore::new()));
        let mut req = request();
        req.is_unlimited = true;
        req.max_uses = None;
        let coupon = service.issue(req).await.unwrap();
        assert!(coupon.usage.is_unlimited);
        assert_eq!(coupon.usage.max_uses, None);
    }

    #[tokio::test]
    async fn test_validation() {
        let service = IssuanceService::new(Arc::new(MockCouponStore::new()));

        let mut req = request();
        req.max_uses = Some(0);
        assert!(matches!(service.issue(req).await, Err(CouponError::Validation(_))));

        let mut req = request();
        req.end_date = req.start_date;
        assert!(matches!(service.issue(req).await, Err(CouponError::Validation(_))));

        let mut req = request();
        req.value = CouponValue::Percentage { percent: 120 };
        assert!(matches!(service.issue(req).await, Err(CouponError::Validation(_))));

        let mut req = request();
        req.code = Some("bad code".to_string());
        assert!(matches!(service.issue(req).await, Err(CouponError::Validation(_))));
    }

    #[tokio::test]
    async fn test_generated_code_collision_is_retried() {
        let mut store = MockCouponStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|c| Err(CouponError::CodeAlreadyExists(c.code.clone())));
        store
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|c| Ok(c.clone()));

        let service = IssuanceService::new(Arc::new(store));
        assert!(service.issue(request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_reject_and_cancel_are_terminal() {
        let service = IssuanceService::new(Arc::new(MemoryCouponStore::new()));
        let coupon = service.issue(request()).await.unwrap();

        let cancelled = service.cancel(coupon.id).await.unwrap();
        assert_eq!(cancelled.status, CouponStatus::Cancelled);
        assert!(service.reject(coupon.id).await.is_err());
        assert!(service.activate(coupon.id).await.is_err());

        assert!(matches!(
            service.cancel(Uuid::new_v4()).await,
            Err(CouponError::CouponNotFound(_))
        ));
    }
}
