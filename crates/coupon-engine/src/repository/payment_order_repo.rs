//! 支付订单仓储（Redis）
//!
//! 订单以 JSON 存放，带 TTL。状态变更通过 Lua 脚本做比较并替换，
//! 并发验签不会互相覆盖。

use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use coupon_shared::cache::{Cache, CacheKey};

use super::traits::PaymentOrderStore;
use crate::error::{CouponError, Result};
use crate::models::PaymentOrder;

/// Redis 支付订单存储
pub struct RedisPaymentOrderStore {
    cache: Cache,
    ttl: Duration,
}

impl RedisPaymentOrderStore {
    pub fn new(cache: Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl PaymentOrderStore for RedisPaymentOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn insert(&self, order: &PaymentOrder) -> Result<()> {
        let key = CacheKey::payment_order(&order.order_id);
        if !self.cache.set_nx(&key, order, self.ttl).await? {
            return Err(CouponError::Internal(format!(
                "支付订单号重复: {}",
                order.order_id
            )));
        }
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        let key = CacheKey::payment_order(order_id);
        Ok(self.cache.get(&key).await?)
    }

    #[instrument(skip(self, expected, updated), fields(order_id = %expected.order_id))]
    async fn compare_and_swap(
        &self,
        expected: &PaymentOrder,
        updated: &PaymentOrder,
    ) -> Result<bool> {
        let key = CacheKey::payment_order(&expected.order_id);
        Ok(self.cache.compare_and_set(&key, expected, updated).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentOrderStatus;
    use chrono::Utc;
    use coupon_shared::config::RedisConfig;

    #[tokio::test]
    #[ignore] // 需要 Redis
    async fn test_redis_order_roundtrip_and_cas() {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| RedisConfig::default().url),
            pool_size: 2,
        };
        let store = RedisPaymentOrderStore::new(Cache::new(&config).unwrap(), Duration::from_secs(60));
        let now = Utc::now();
        let order = PaymentOrder {
            order_id: format!("order_{}", uuid::Uuid::new_v4().simple()),
            gateway: "sandbox".to_string(),
            key_id: "key".to_string(),
            coupon_id: None,
            amount: 20_000,
            currency: "INR".to_string(),
            receipt: "receipt-1".to_string(),
            status: PaymentOrderStatus::Created,
            transaction_id: None,
            failure_reason: None,
            consumed_by: None,
            created_at: now,
            updated_at: now,
        };

        store.insert(&order).await.unwrap();
        assert!(store.insert(&order).await.is_err());

        let mut verified = order.clone();
        verified.status = PaymentOrderStatus::Verified;
        assert!(store.compare_and_swap(&order, &verified).await.unwrap());
        assert!(!store.compare_and_swap(&order, &verified).await.unwrap());

        let loaded = store.get(&order.order_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PaymentOrderStatus::Verified);
    }
}
