//! 核销流水实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 核销时关联的已收款信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReference {
    pub gateway: String,
    pub order_id: String,
    pub transaction_id: String,
    /// 最小货币单位
    pub amount: i64,
}

impl PaymentReference {
    /// 支付门控核销的幂等键
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.gateway, self.transaction_id)
    }
}

/// 核销流水（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRecord {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub redeemed_by: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub payment_reference: Option<PaymentReference>,
    pub idempotency_key: String,
    /// 本次提交后的 used_count，用于幂等重放原结果
    pub used_count_after: i32,
    pub created_at: DateTime<Utc>,
}

/// 核销流水数据库行
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RedemptionRecordRow {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub redeemed_by: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub payment_gateway: Option<String>,
    pub payment_order_id: Option<String>,
    pub payment_transaction_id: Option<String>,
    pub payment_amount: Option<i64>,
    pub idempotency_key: String,
    pub used_count_after: i32,
    pub created_at: DateTime<Utc>,
}

impl From<RedemptionRecordRow> for RedemptionRecord {
    fn from(row: RedemptionRecordRow) -> Self {
        let payment_reference = match (
            row.payment_gateway,
            row.payment_order_id,
            row.payment_transaction_id,
            row.payment_amount,
        ) {
            (Some(gateway), Some(order_id), Some(transaction_id), Some(amount)) => {
                Some(PaymentReference {
                    gateway,
                    order_id,
                    transaction_id,
                    amount,
                })
            }
            _ => None,
        };

        Self {
            id: row.id,
            coupon_id: row.coupon_id,
            redeemed_by: row.redeemed_by,
            location: row.location,
            notes: row.notes,
            payment_reference,
            idempotency_key: row.idempotency_key,
            used_count_after: row.used_count_after,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_idempotency_key() {
        let reference = PaymentReference {
            gateway: "razorpay".to_string(),
            order_id: "order_1".to_string(),
            transaction_id: "pay_9".to_string(),
            amount: 20_000,
        };
        assert_eq!(reference.idempotency_key(), "razorpay:pay_9");
    }

    #[test]
    fn test_row_without_payment() {
        let row = RedemptionRecordRow {
            id: Uuid::new_v4(),
            coupon_id: Uuid::new_v4(),
            redeemed_by: "partner-1".to_string(),
            location: None,
            notes: None,
            payment_gateway: None,
            payment_order_id: None,
            payment_transaction_id: None,
            payment_amount: None,
            idempotency_key: "k1".to_string(),
            used_count_after: 1,
            created_at: Utc::now(),
        };
        let record = RedemptionRecord::from(row);
        assert!(record.payment_reference.is_none());
        assert_eq!(record.used_count_after, 1);
    }
}
