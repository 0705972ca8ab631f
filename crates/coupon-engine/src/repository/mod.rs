//! 仓储层
//!
//! PostgreSQL 持久化券与核销流水，Redis 保存支付订单；内存实现满足同样的契约，
//! 用于开发环境与测试。

mod coupon_repo;
mod ledger_repo;
mod memory;
mod payment_order_repo;
mod traits;

pub use coupon_repo::CouponRepository;
pub use ledger_repo::RedemptionLedgerRepository;
pub use memory::{MemoryCouponStore, MemoryPaymentOrderStore};
pub use payment_order_repo::RedisPaymentOrderStore;
pub use traits::*;
