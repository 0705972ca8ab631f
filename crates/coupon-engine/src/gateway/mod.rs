//! 支付网关
//!
//! 只关心网关的下单与验签契约，不涉及网关内部机制。

mod razorpay;
mod sandbox;
pub mod signature;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coupon_shared::config::{GatewayKind, PaymentConfig};

use crate::error::Result;

pub use razorpay::RazorpayGateway;
pub use sandbox::SandboxGateway;

/// 网关下单结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

/// 支付网关接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// 网关名称，写入支付引用并参与幂等键
    fn name(&self) -> &'static str;

    async fn create_order(&self, amount: i64, currency: &str, receipt: &str)
    -> Result<GatewayOrder>;

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;
}

/// 按配置构建网关
pub fn build_gateway(config: &PaymentConfig) -> Result<Arc<dyn PaymentGateway>> {
    Ok(match config.gateway {
        GatewayKind::Razorpay => Arc::new(RazorpayGateway::new(config)?),
        GatewayKind::Sandbox => Arc::new(SandboxGateway::new(&config.key_id, &config.key_secret)),
    })
}
