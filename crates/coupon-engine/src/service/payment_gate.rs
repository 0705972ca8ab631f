//! 支付门控
//!
//! 两阶段握手：创建订单 -> 验签。订单状态机 created -> verified | failed，
//! 状态变更通过订单存储的比较并替换完成。
//!
//! 已验签订单在被某次核销引用之前一直可用，核销提交崩溃后可以用同一幂等键重试，
//! 无需再次付款。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use coupon_shared::observability::metrics;

use crate::error::{CouponError, Result};
use crate::gateway::PaymentGateway;
use crate::models::{PaymentOrder, PaymentOrderStatus, PaymentVerification, VerificationResult};
use crate::repository::PaymentOrderStore;
use crate::service::dto::CreateOrderRequest;

/// 状态 CAS 冲突时的最大重读次数
const MAX_CAS_ATTEMPTS: usize = 5;

/// 支付门控
pub struct PaymentGate {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn PaymentOrderStore>,
    default_currency: String,
}

impl PaymentGate {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn PaymentOrderStore>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            orders,
            default_currency: default_currency.into(),
        }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    /// 创建支付订单
    ///
    /// 网关失败返回 `OrderCreationFailed`，调用方可以重新下单。
    /// 网关超时不会自动重新下单，避免重复扣款。
    #[instrument(skip(self), fields(amount = request.amount, coupon_id = ?request.coupon_id))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<PaymentOrder> {
        if request.amount <= 0 {
            return Err(CouponError::Validation("金额必须大于 0".to_string()));
        }
        let receipt = request.receipt.trim();
        if receipt.is_empty() || receipt.len() > 40 {
            return Err(CouponError::Validation("收据号长度必须为 1-40".to_string()));
        }
        let currency = request
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_currency)
            .to_uppercase();

        let gateway_order = match self
            .gateway
            .create_order(request.amount, &currency, receipt)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "支付网关下单失败");
                metrics::record_payment_order(self.gateway.name(), "failed");
                return Err(CouponError::OrderCreationFailed(e.to_string()));
            }
        };

        let now = Utc::now();
        let order = PaymentOrder {
            order_id: gateway_order.order_id,
            gateway: self.gateway.name().to_string(),
            key_id: gateway_order.key_id,
            coupon_id: request.coupon_id,
            amount: gateway_order.amount,
            currency: gateway_order.currency,
            receipt: receipt.to_string(),
            status: PaymentOrderStatus::Created,
            transaction_id: None,
            failure_reason: None,
            consumed_by: None,
            created_at: now,
            updated_at: now,
        };

        self.orders.insert(&order).await?;
        metrics::record_payment_order(self.gateway.name(), "created");
        info!(order_id = %order.order_id, "支付订单已创建");

        Ok(order)
    }

    /// 验证支付签名
    ///
    /// - created：签名正确 -> verified（记录支付流水号），否则 -> failed
    /// - verified：同一支付流水号重复验证仍为 Verified，不同流水号为 Failed
    /// - failed：始终 Failed
    #[instrument(skip(self, verification), fields(payment_id = %verification.payment_id))]
    pub async fn verify(
        &self,
        order_id: &str,
        verification: &PaymentVerification,
    ) -> Result<VerificationResult> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.order_status(order_id).await?;

            let updated = match current.status {
                PaymentOrderStatus::Failed => {
                    return Ok(VerificationResult::Failed {
                        reason: current
                            .failure_reason
                            .unwrap_or_else(|| "订单已验签失败".to_string()),
                    });
                }
                PaymentOrderStatus::Verified => {
                    let result = if current.transaction_id.as_deref()
                        == Some(verification.payment_id.as_str())
                    {
                        VerificationResult::Verified { order: current }
                    } else {
                        VerificationResult::Failed {
                            reason: "订单已由其他支付完成验签".to_string(),
                        }
                    };
                    return Ok(result);
                }
                PaymentOrderStatus::Created => {
                    let valid = self.gateway.verify_signature(
                        order_id,
                        &verification.payment_id,
                        &verification.signature,
                    );

                    let mut updated = current.clone();
                    updated.updated_at = Utc::now();
                    if valid {
                        updated.status = PaymentOrderStatus::Verified;
                        updated.transaction_id = Some(verification.payment_id.clone());
                    } else {
                        updated.status = PaymentOrderStatus::Failed;
                        updated.failure_reason = Some("签名校验失败".to_string());
                    }

                    if !self.orders.compare_and_swap(&current, &updated).await? {
                        // 并发验签改写了订单，重读后按最新状态判定
                        continue;
                    }
                    updated
                }
            };

            metrics::record_payment_verification(
                self.gateway.name(),
                updated.status == PaymentOrderStatus::Verified,
            );

            return Ok(match updated.status {
                PaymentOrderStatus::Verified => {
                    info!(order_id = %order_id, "支付验签成功");
                    VerificationResult::Verified { order: updated }
                }
                _ => {
                    warn!(order_id = %order_id, "支付验签失败");
                    VerificationResult::Failed {
                        reason: updated
                            .failure_reason
                            .unwrap_or_else(|| "签名校验失败".to_string()),
                    }
                }
            });
        }

        Err(CouponError::ConcurrencyConflict)
    }

    /// 查询订单当前状态（网关超时后应轮询此接口，而不是重新下单）
    pub async fn order_status(&self, order_id: &str) -> Result<PaymentOrder> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| CouponError::PaymentOrderNotFound(order_id.to_string()))
    }

    /// 获取已验签订单，未验签或不存在时返回 None
    pub async fn verified_order(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        Ok(self
            .orders
            .get(order_id)
            .await?
            .filter(|o| o.status == PaymentOrderStatus::Verified))
    }

    /// 在订单上记录引用它的核销流水
    ///
    /// 核销流水上的唯一索引才是防重的依据，这里只做标记
    pub async fn mark_consumed(&self, order_id: &str, record_id: Uuid) -> Result<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.order_status(order_id).await?;
            if current.consumed_by.is_some() {
                return Ok(());
            }

            let mut updated = current.clone();
            updated.consumed_by = Some(record_id);
            updated.updated_at = Utc::now();

            if self.orders.compare_and_swap(&current, &updated).await? {
                return Ok(());
            }
        }

        Err(CouponError::ConcurrencyConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayOrder, MockPaymentGateway, SandboxGateway};
    use crate::repository::MemoryPaymentOrderStore;

    fn gate() -> (PaymentGate, Arc<SandboxGateway>) {
        let sandbox = Arc::new(SandboxGateway::new("rzp_test", "secret"));
        let gate = PaymentGate::new(
            sandbox.clone(),
            Arc::new(MemoryPaymentOrderStore::new()),
            "INR",
        );
        (gate, sandbox)
    }

    fn order_request(amount: i64) -> CreateOrderRequest {
        CreateOrderRequest {
            amount,
            currency: None,
            coupon_id: None,
            receipt: "receipt-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_order_defaults_currency() {
        let (gate, _) = gate();
        let order = gate.create_order(order_request(20_000)).await.unwrap();
        assert_eq!(order.currency, "INR");
        assert_eq!(order.status, PaymentOrderStatus::Created);
        assert_eq!(order.gateway, "sandbox");
    }

    #[tokio::test]
    async fn test_create_order_rejects_non_positive_amount() {
        let (gate, _) = gate();
        assert!(matches!(
            gate.create_order(order_request(0)).await,
            Err(CouponError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_gateway_failure_is_order_creation_failed() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_name().return_const("mock");
        gateway
            .expect_create_order()
            .returning(|_, _, _| Err(CouponError::GatewayTimeout));

        let gate = PaymentGate::new(
            Arc::new(gateway),
            Arc::new(MemoryPaymentOrderStore::new()),
            "INR",
        );
        assert!(matches!(
            gate.create_order(order_request(100)).await,
            Err(CouponError::OrderCreationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_success_then_idempotent() {
        let (gate, sandbox) = gate();
        let order = gate.create_order(order_request(20_000)).await.unwrap();
        let verification = PaymentVerification {
            payment_id: "pay_1".to_string(),
            signature: sandbox.sign_payment(&order.order_id, "pay_1"),
        };

        let result = gate.verify(&order.order_id, &verification).await.unwrap();
        assert!(result.is_verified());

        // 同一支付重复验签
        let again = gate.verify(&order.order_id, &verification).await.unwrap();
        assert!(again.is_verified());

        // 已验签订单换一笔支付
        let other = PaymentVerification {
            payment_id: "pay_2".to_string(),
            signature: sandbox.sign_payment(&order.order_id, "pay_2"),
        };
        assert!(!gate.verify(&order.order_id, &other).await.unwrap().is_verified());

        let stored = gate.verified_order(&order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.transaction_id.as_deref(), Some("pay_1"));
    }

    #[tokio::test]
    async fn test_bad_signature_fails_order_permanently() {
        let (gate, sandbox) = gate();
        let order = gate.create_order(order_request(500)).await.unwrap();

        let bad = PaymentVerification {
            payment_id: "pay_1".to_string(),
            signature: "00".repeat(32),
        };
        let result = gate.verify(&order.order_id, &bad).await.unwrap();
        assert!(matches!(result, VerificationResult::Failed { .. }));

        // 失败是终态，正确签名也无法再验证
        let good = PaymentVerification {
            payment_id: "pay_1".to_string(),
            signature: sandbox.sign_payment(&order.order_id, "pay_1"),
        };
        assert!(!gate.verify(&order.order_id, &good).await.unwrap().is_verified());
        assert!(gate.verified_order(&order.order_id).await.unwrap().is_none());
        assert_eq!(
            gate.order_status(&order.order_id).await.unwrap().status,
            PaymentOrderStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let (gate, _) = gate();
        let verification = PaymentVerification {
            payment_id: "pay_1".to_string(),
            signature: "ab".to_string(),
        };
        assert!(matches!(
            gate.verify("order_missing", &verification).await,
            Err(CouponError::PaymentOrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_consumed_is_sticky() {
        let (gate, sandbox) = gate();
        let order = gate.create_order(order_request(100)).await.unwrap();
        let verification = PaymentVerification {
            payment_id: "pay_9".to_string(),
            signature: sandbox.sign_payment(&order.order_id, "pay_9"),
        };
        gate.verify(&order.order_id, &verification).await.unwrap();

        let first = Uuid::new_v4();
        gate.mark_consumed(&order.order_id, first).await.unwrap();
        gate.mark_consumed(&order.order_id, Uuid::new_v4()).await.unwrap();

        let stored = gate.order_status(&order.order_id).await.unwrap();
        assert_eq!(stored.consumed_by, Some(first));
    }

    #[tokio::test]
    async fn test_gateway_amount_is_recorded() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_name().return_const("mock");
        gateway.expect_create_order().returning(|amount, currency, _| {
            Ok(GatewayOrder {
                order_id: "order_fixed".to_string(),
                amount,
                currency: currency.to_string(),
                key_id: "key".to_string(),
            })
        });

        let gate = PaymentGate::new(
            Arc::new(gateway),
            Arc::new(MemoryPaymentOrderStore::new()),
            "INR",
        );
        let mut request = order_request(999);
        request.currency = Some("usd".to_string());
        let order = gate.create_order(request).await.unwrap();
        assert_eq!(order.amount, 999);
        assert_eq!(order.currency, "USD");
        assert_eq!(order.order_id, "order_fixed");
    }
}
