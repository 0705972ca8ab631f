//! 应用状态定义
//!
//! 按配置装配存储后端（PostgreSQL + Redis 或内存）与支付网关，
//! 服务实例通过 Arc 在 handler 间共享。

use std::sync::Arc;

use tracing::info;

use coupon_engine::gateway::{PaymentGateway, build_gateway};
use coupon_engine::repository::{
    CouponRepository, CouponStore, MemoryCouponStore, MemoryPaymentOrderStore, PaymentOrderStore,
    RedemptionLedger, RedemptionLedgerRepository, RedisPaymentOrderStore,
};
use coupon_engine::service::{IssuanceService, LookupService, PaymentGate, RedemptionEngine};
use coupon_shared::cache::Cache;
use coupon_shared::config::{AppConfig, StorageBackend};
use coupon_shared::database::Database;
use coupon_shared::retry::RetryPolicy;

use crate::error::Result;

/// 存储后端三件套
pub struct Stores {
    pub coupons: Arc<dyn CouponStore>,
    pub ledger: Arc<dyn RedemptionLedger>,
    pub orders: Arc<dyn PaymentOrderStore>,
}

impl Stores {
    /// 内存后端，券与流水共享同一把锁
    pub fn memory() -> Self {
        let store = MemoryCouponStore::new();
        Self {
            coupons: Arc::new(store.clone()),
            ledger: Arc::new(store),
            orders: Arc::new(MemoryPaymentOrderStore::new()),
        }
    }

    pub fn postgres(database: &Database, cache: &Cache, config: &AppConfig) -> Self {
        Self {
            coupons: Arc::new(CouponRepository::new(database.pool().clone())),
            ledger: Arc::new(RedemptionLedgerRepository::new(database.pool().clone())),
            orders: Arc::new(RedisPaymentOrderStore::new(
                cache.clone(),
                config.payment.order_ttl(),
            )),
        }
    }
}

/// 外部依赖，供就绪探针检查
#[derive(Clone)]
pub struct Infra {
    pub database: Database,
    pub cache: Cache,
}

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub issuance: Arc<IssuanceService>,
    pub lookup: Arc<LookupService>,
    pub engine: Arc<RedemptionEngine>,
    pub payments: Arc<PaymentGate>,
    /// 内存后端时为空
    pub infra: Option<Infra>,
}

impl AppState {
    pub fn new(stores: Stores, gateway: Arc<dyn PaymentGateway>, config: &AppConfig) -> Self {
        let payments = Arc::new(PaymentGate::new(
            gateway,
            stores.orders,
            config.payment.currency.clone(),
        ));

        let retry_policy = RetryPolicy::from_millis(
            config.redemption.commit_max_retries,
            config.redemption.commit_initial_delay_ms,
            config.redemption.commit_max_delay_ms,
        );

        Self {
            service_name: config.service_name.clone(),
            issuance: Arc::new(IssuanceService::new(stores.coupons.clone())),
            lookup: Arc::new(LookupService::new(stores.coupons.clone())),
            engine: Arc::new(RedemptionEngine::new(
                stores.coupons,
                stores.ledger,
                payments.clone(),
                retry_policy,
            )),
            payments,
            infra: None,
        }
    }

    /// 内存后端 + 配置指定的网关
    pub fn in_memory(config: &AppConfig) -> Result<Self> {
        let gateway = build_gateway(&config.payment)?;
        Ok(Self::new(Stores::memory(), gateway, config))
    }

    /// 按 storage.backend 装配
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage backend");
                Self::in_memory(config)
            }
            StorageBackend::Postgres => {
                let database = Database::connect(&config.database).await?;
                if config.database.run_migrations {
                    database.run_migrations().await?;
                }
                let cache = Cache::new(&config.redis)?;
                info!("Using PostgreSQL + Redis storage backend");

                let gateway = build_gateway(&config.payment)?;
                let stores = Stores::postgres(&database, &cache, config);
                let mut state = Self::new(stores, gateway, config);
                state.infra = Some(Infra { database, cache });
                Ok(state)
            }
        }
    }

    pub fn storage_backend(&self) -> &'static str {
        if self.infra.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }
}
