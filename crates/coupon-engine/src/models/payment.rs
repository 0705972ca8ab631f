//! 支付订单实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::PaymentOrderStatus;

/// 支付订单
///
/// 由支付门控独占，状态只能 created -> verified | failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub order_id: String,
    pub gateway: String,
    /// 前端拉起支付所需的公钥 ID
    pub key_id: String,
    pub coupon_id: Option<Uuid>,
    /// 最小货币单位
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub status: PaymentOrderStatus,
    /// 验签成功时记录网关支付流水号
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    /// 关联的核销流水，仅供参考，以核销流水为准
    pub consumed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 客户端回传的支付凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub payment_id: String,
    pub signature: String,
}

/// 验签结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationResult {
    Verified { order: PaymentOrder },
    Failed { reason: String },
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}
