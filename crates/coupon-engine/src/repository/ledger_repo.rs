//! 核销流水仓储
//!
//! redemption_records 只追加。写入只在券仓储的提交事务中经由 `insert_in_tx` 发生。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::RedemptionLedger;
use crate::error::Result;
use crate::models::{RedemptionRecord, RedemptionRecordRow};

const RECORD_COLUMNS: &str = r#"
    id, coupon_id, redeemed_by, location, notes,
    payment_gateway, payment_order_id, payment_transaction_id, payment_amount,
    idempotency_key, used_count_after, created_at
"#;

/// 核销流水仓储
pub struct RedemptionLedgerRepository {
    pool: PgPool,
}

impl RedemptionLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中追加流水
    pub async fn insert_in_tx(tx: &mut PgConnection, record: &RedemptionRecord) -> Result<()> {
        let payment = record.payment_reference.as_ref();

        sqlx::query(
            r#"
            INSERT INTO redemption_records (
                id, coupon_id, redeemed_by, location, notes,
                payment_gateway, payment_order_id, payment_transaction_id, payment_amount,
                idempotency_key, used_count_after, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.coupon_id)
        .bind(&record.redeemed_by)
        .bind(&record.location)
        .bind(&record.notes)
        .bind(payment.map(|p| p.gateway.as_str()))
        .bind(payment.map(|p| p.order_id.as_str()))
        .bind(payment.map(|p| p.transaction_id.as_str()))
        .bind(payment.map(|p| p.amount))
        .bind(&record.idempotency_key)
        .bind(record.used_count_after)
        .bind(record.created_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 在事务中按幂等键查询
    pub async fn find_by_idempotency_key_in_tx(
        tx: &mut PgConnection,
        key: &str,
    ) -> Result<Option<RedemptionRecord>> {
        let row = sqlx::query_as::<_, RedemptionRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM redemption_records WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(tx)
        .await?;

        Ok(row.map(RedemptionRecord::from))
    }

    /// 在事务中按支付订单查询
    pub async fn find_by_payment_in_tx(
        tx: &mut PgConnection,
        gateway: &str,
        order_id: &str,
    ) -> Result<Option<RedemptionRecord>> {
        let row = sqlx::query_as::<_, RedemptionRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM redemption_records \
             WHERE payment_gateway = $1 AND payment_order_id = $2"
        ))
        .bind(gateway)
        .bind(order_id)
        .fetch_optional(tx)
        .await?;

        Ok(row.map(RedemptionRecord::from))
    }
}

#[async_trait]
impl RedemptionLedger for RedemptionLedgerRepository {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RedemptionRecord>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_idempotency_key_in_tx(&mut conn, key).await
    }

    async fn find_by_payment(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> Result<Option<RedemptionRecord>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_payment_in_tx(&mut conn, gateway, order_id).await
    }

    async fn list_by_coupon(&self, coupon_id: Uuid, limit: i64) -> Result<Vec<RedemptionRecord>> {
        let rows = sqlx::query_as::<_, RedemptionRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM redemption_records \
             WHERE coupon_id = $1 ORDER BY created_at ASC, used_count_after ASC LIMIT $2"
        ))
        .bind(coupon_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RedemptionRecord::from).collect())
    }

    async fn count_by_coupon(&self, coupon_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM redemption_records WHERE coupon_id = $1")
                .bind(coupon_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}
