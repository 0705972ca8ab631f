//! 券查询校验服务
//!
//! 把券码或二维码解码内容解析为 `Verdict`。先按券码（大小写不敏感）匹配，
//! 再按二维码令牌匹配。

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, instrument};

use coupon_shared::observability::metrics;

use crate::error::Result;
use crate::models::{Coupon, Verdict};
use crate::repository::CouponStore;

/// 标识符最大长度
pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("标识符正则表达式合法"));

/// 清洗标识符：去除首尾空白，长度 1..=128，仅允许字母数字、下划线和连字符
pub fn sanitize_identifier(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_IDENTIFIER_LEN {
        return None;
    }
    IDENTIFIER_PATTERN.is_match(trimmed).then_some(trimmed)
}

/// 券查询校验服务
pub struct LookupService {
    store: Arc<dyn CouponStore>,
}

impl LookupService {
    pub fn new(store: Arc<dyn CouponStore>) -> Self {
        Self { store }
    }

    /// 按标识符解析券
    pub async fn resolve(&self, identifier: &str) -> Result<Option<Coupon>> {
        if let Some(coupon) = self.store.get_by_code(identifier).await? {
            return Ok(Some(coupon));
        }
        self.store.get_by_qr_token(identifier).await
    }

    /// 判定券当前是否可用
    #[instrument(skip(self))]
    pub async fn classify(&self, identifier: &str) -> Result<Verdict> {
        self.classify_at(identifier, Utc::now()).await
    }

    /// 在指定时刻判定
    pub async fn classify_at(&self, identifier: &str, now: DateTime<Utc>) -> Result<Verdict> {
        let verdict = match sanitize_identifier(identifier) {
            None => Verdict::malformed(),
            Some(id) => match self.resolve(id).await? {
                None => Verdict::NotFound,
                Some(coupon) => Verdict::evaluate(&coupon, now),
            },
        };

        debug!(verdict = verdict.label(), "券查询完成");
        metrics::record_lookup(verdict.label());

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CouponError;
    use crate::models::{CouponStatus, CouponValue, InvalidReason, Usage, Validity};
    use crate::repository::MockCouponStore;
    use chrono::Duration;
    use mockall::predicate::eq;
    use uuid::Uuid;

    fn active_coupon() -> Coupon {
        let now = Utc::now();
        Coupon {
            id: Uuid::new_v4(),
            code: "FOOD50".to_string(),
            title: "Meal".to_string(),
            category: "food".to_string(),
            value: CouponValue::Flat { amount: 5_000 },
            validity: Validity {
                start_date: now - Duration::days(1),
                end_date: now + Duration::days(1),
            },
            usage: Usage::limited(2),
            status: CouponStatus::Active,
            owner_scope: None,
            qr_token: "qr_abc".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("  FOOD50 \n"), Some("FOOD50"));
        assert_eq!(sanitize_identifier("qr_abc-1"), Some("qr_abc-1"));
        assert_eq!(sanitize_identifier(""), None);
        assert_eq!(sanitize_identifier("   "), None);
        assert_eq!(sanitize_identifier("FOO 50"), None);
        assert_eq!(sanitize_identifier("FOO;DROP"), None);
        assert_eq!(sanitize_identifier(&"A".repeat(128)), Some("A".repeat(128).as_str()));
        assert_eq!(sanitize_identifier(&"A".repeat(129)), None);
    }

    #[tokio::test]
    async fn test_malformed_identifier_skips_store() {
        // 未设置任何期望，访问存储会直接 panic
        let service = LookupService::new(Arc::new(MockCouponStore::new()));
        let verdict = service.classify("bad identifier!").await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Invalid {
                reason: InvalidReason::Malformed
            }
        );
    }

    #[tokio::test]
    async fn test_code_then_qr_token() {
        let coupon = active_coupon();
        let mut store = MockCouponStore::new();
        store
            .expect_get_by_code()
            .with(eq("qr_abc"))
            .returning(|_| Ok(None));
        let found = coupon.clone();
        store
            .expect_get_by_qr_token()
            .with(eq("qr_abc"))
            .returning(move |_| Ok(Some(found.clone())));

        let service = LookupService::new(Arc::new(store));
        let verdict = service.classify("qr_abc").await.unwrap();
        assert!(verdict.is_valid());
    }

    #[tokio::test]
    async fn test_not_found() {
        let mut store = MockCouponStore::new();
        store.expect_get_by_code().returning(|_| Ok(None));
        store.expect_get_by_qr_token().returning(|_| Ok(None));

        let service = LookupService::new(Arc::new(store));
        assert_eq!(service.classify("NOPE").await.unwrap(), Verdict::NotFound);
    }

    #[tokio::test]
    async fn test_store_failure_is_error() {
        let mut store = MockCouponStore::new();
        store
            .expect_get_by_code()
            .returning(|_| Err(CouponError::Database(sqlx::Error::PoolTimedOut)));

        let service = LookupService::new(Arc::new(store));
        assert!(service.classify("FOOD50").await.is_err());
    }
}
