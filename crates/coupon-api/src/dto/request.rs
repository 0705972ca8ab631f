//! 请求 DTO 定义

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use coupon_engine::models::{CouponValue, PaymentVerification};
use coupon_engine::service::{
    CollectedPayment, CreateOrderRequest, IssueCouponRequest, RedeemRequest,
};

/// 创建券请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IssueCouponBody {
    /// 不传则自动生成
    #[validate(length(min = 1, max = 128, message = "券码长度必须在1-128个字符之间"))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: String,
    #[validate(length(min = 1, max = 64, message = "分类长度必须在1-64个字符之间"))]
    pub category: String,
    pub value: CouponValue,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub is_unlimited: bool,
    #[validate(range(min = 1, message = "maxUses 必须大于0"))]
    pub max_uses: Option<i32>,
    #[validate(length(max = 128))]
    pub owner_scope: Option<String>,
    /// 创建后直接激活
    #[serde(default)]
    pub activate: bool,
}

impl From<IssueCouponBody> for IssueCouponRequest {
    fn from(body: IssueCouponBody) -> Self {
        Self {
            code: body.code,
            title: body.title,
            category: body.category,
            value: body.value,
            start_date: body.start_date,
            end_date: body.end_date,
            is_unlimited: body.is_unlimited,
            max_uses: body.max_uses,
            owner_scope: body.owner_scope,
            activate: body.activate,
        }
    }
}

/// 合作方代收款项
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReferenceBody {
    #[validate(length(min = 1, max = 128))]
    pub order_id: String,
    #[validate(range(min = 1, message = "金额必须大于0"))]
    pub amount: i64,
    #[validate(length(min = 1, max = 128))]
    pub transaction_id: Option<String>,
}

/// 核销请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemBody {
    #[validate(length(min = 1, max = 128, message = "actor 长度必须在1-128个字符之间"))]
    pub actor: String,
    #[validate(length(max = 256))]
    pub location: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// 也可通过 Idempotency-Key 请求头传入，请求体优先
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
    #[serde(alias = "collectedPayment")]
    #[validate(nested)]
    pub payment_reference: Option<PaymentReferenceBody>,
}

impl RedeemBody {
    pub fn into_request(self, coupon_id: Uuid, header_key: Option<String>) -> RedeemRequest {
        RedeemRequest {
            coupon_id,
            actor: self.actor,
            location: self.location,
            notes: self.notes,
            idempotency_key: self.idempotency_key.or(header_key),
            collected_payment: self.payment_reference.map(|p| CollectedPayment {
                order_id: p.order_id,
                amount: p.amount,
                transaction_id: p.transaction_id,
            }),
        }
    }
}

/// 创建支付订单请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    #[validate(range(min = 1, message = "金额必须大于0"))]
    pub amount: i64,
    #[validate(length(equal = 3, message = "币种必须为3位代码"))]
    pub currency: Option<String>,
    pub coupon_id: Option<Uuid>,
    #[validate(length(min = 1, max = 40, message = "receipt 长度必须在1-40个字符之间"))]
    pub receipt: String,
}

impl From<CreateOrderBody> for CreateOrderRequest {
    fn from(body: CreateOrderBody) -> Self {
        Self {
            amount: body.amount,
            currency: body.currency,
            coupon_id: body.coupon_id,
            receipt: body.receipt,
        }
    }
}

/// 验签请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentBody {
    #[validate(length(min = 1, max = 128))]
    pub order_id: String,
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 256))]
    pub signature: String,
}

impl VerifyPaymentBody {
    pub fn verification(&self) -> PaymentVerification {
        PaymentVerification {
            payment_id: self.payment_id.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// 核销流水查询参数
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionListQuery {
    #[serde(default = "default_redemption_limit")]
    pub limit: i64,
}

fn default_redemption_limit() -> i64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redeem_body_accepts_both_payment_field_names() {
        let body: RedeemBody = serde_json::from_value(json!({
            "actor": "partner-1",
            "collectedPayment": {"orderId": "order_1", "amount": 20000}
        }))
        .unwrap();
        assert!(body.validate().is_ok());

        let request = body.into_request(Uuid::nil(), Some("hdr-key".to_string()));
        assert_eq!(request.idempotency_key.as_deref(), Some("hdr-key"));
        assert_eq!(request.collected_payment.unwrap().amount, 20_000);
    }

    #[test]
    fn test_body_key_wins_over_header() {
        let body: RedeemBody = serde_json::from_value(json!({
            "actor": "partner-1",
            "idempotencyKey": "body-key"
        }))
        .unwrap();
        let request = body.into_request(Uuid::nil(), Some("hdr-key".to_string()));
        assert_eq!(request.idempotency_key.as_deref(), Some("body-key"));
    }

    #[test]
    fn test_redeem_body_validation() {
        let body: RedeemBody = serde_json::from_value(json!({
            "actor": "",
            "paymentReference": {"orderId": "order_1", "amount": 0}
        }))
        .unwrap();
        let errors = body.validate().unwrap_err();
        let message = errors.to_string();
        assert!(message.contains("actor"));
    }

    #[test]
    fn test_issue_body_deserialize() {
        let body: IssueCouponBody = serde_json::from_value(json!({
            "title": "Free meal",
            "category": "food",
            "value": {"kind": "flat", "amount": 20000},
            "startDate": "2026-01-01T00:00:00Z",
            "endDate": "2026-12-31T00:00:00Z",
            "maxUses": 1
        }))
        .unwrap();
        assert!(body.validate().is_ok());
        assert!(!body.is_unlimited);
        assert_eq!(body.value, CouponValue::Flat { amount: 20_000 });
    }
}
