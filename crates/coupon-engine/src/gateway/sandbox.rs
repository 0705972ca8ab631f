//! 沙箱网关
//!
//! 本地生成订单号，验签与真实网关使用同一算法，用于开发环境与测试。

use async_trait::async_trait;
use uuid::Uuid;

use super::{GatewayOrder, PaymentGateway, signature};
use crate::error::{CouponError, Result};

pub struct SandboxGateway {
    key_id: String,
    key_secret: String,
}

impl SandboxGateway {
    pub fn new(key_id: &str, key_secret: &str) -> Self {
        Self {
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
        }
    }

    /// 模拟客户端完成支付后拿到的签名
    pub fn sign_payment(&self, order_id: &str, payment_id: &str) -> String {
        signature::sign(order_id, payment_id, &self.key_secret)
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder> {
        if amount <= 0 {
            return Err(CouponError::Gateway(format!("非法金额: {amount}")));
        }

        Ok(GatewayOrder {
            order_id: format!("order_{}", Uuid::new_v4().simple()),
            amount,
            currency: currency.to_string(),
            key_id: self.key_id.clone(),
        })
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        signature::verify(order_id, payment_id, signature, &self.key_secret)
    }
}
