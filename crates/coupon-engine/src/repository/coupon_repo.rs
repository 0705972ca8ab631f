//! 券仓储
//!
//! 负责 coupons 表的数据访问。核销提交在单个事务中完成：
//! 行锁 -> 幂等检查 -> 可用性重评估 -> 支付去重 -> 守卫式计数更新 -> 追加流水。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::ledger_repo::RedemptionLedgerRepository;
use super::traits::{CommitOutcome, CommitRequest, CouponStore};
use crate::error::{CouponError, Result};
use crate::models::{Coupon, CouponFilter, CouponRow, CouponStatus, Verdict};

const COUPON_COLUMNS: &str = r#"
    id, code, title, category, value_kind, value_amount, start_date, end_date,
    is_unlimited, max_uses, used_count, status, owner_scope, qr_token,
    created_at, updated_at
"#;

/// 券仓储
pub struct CouponRepository {
    pool: PgPool,
}

impl CouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        err.as_database_error()
            .is_some_and(|db| db.is_unique_violation())
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE {clause}"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Coupon::try_from).transpose()
    }
}

#[async_trait]
impl CouponStore for CouponRepository {
    #[instrument(skip(self, coupon), fields(code = %coupon.code))]
    async fn create(&self, coupon: &Coupon) -> Result<Coupon> {
        let (value_kind, value_amount) = coupon.value_columns();

        let result = sqlx::query_as::<_, CouponRow>(&format!(
            r#"
            INSERT INTO coupons (
                id, code, title, category, value_kind, value_amount, start_date, end_date,
                is_unlimited, max_uses, used_count, status, owner_scope, qr_token,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(coupon.id)
        .bind(&coupon.code)
        .bind(&coupon.title)
        .bind(&coupon.category)
        .bind(value_kind)
        .bind(value_amount)
        .bind(coupon.validity.start_date)
        .bind(coupon.validity.end_date)
        .bind(coupon.usage.is_unlimited)
        .bind(coupon.usage.max_uses)
        .bind(coupon.usage.used_count)
        .bind(coupon.status)
        .bind(&coupon.owner_scope)
        .bind(&coupon.qr_token)
        .bind(coupon.created_at)
        .bind(coupon.updated_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Coupon::try_from(row),
            Err(e) if Self::is_unique_violation(&e) => {
                Err(CouponError::CodeAlreadyExists(coupon.code.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Coupon::try_from).transpose()
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        self.fetch_one_where("UPPER(code) = UPPER($1)", code).await
    }

    async fn get_by_qr_token(&self, qr_token: &str) -> Result<Option<Coupon>> {
        self.fetch_one_where("qr_token = $1", qr_token).await
    }

    async fn list(&self, filter: &CouponFilter) -> Result<Vec<Coupon>> {
        let rows = sqlx::query_as::<_, CouponRow>(&format!(
            r#"
            SELECT {COUPON_COLUMNS}
            FROM coupons
            WHERE ($1::varchar IS NULL OR status = $1)
              AND ($2::varchar IS NULL OR owner_scope = $2)
              AND ($3::varchar IS NULL OR category = $3)
            ORDER BY created_at DESC, id
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.status)
        .bind(&filter.owner_scope)
        .bind(&filter.category)
        .bind(filter.effective_limit())
        .bind(filter.effective_offset())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Coupon::try_from).collect()
    }

    #[instrument(skip(self, allowed_from))]
    async fn transition_status(
        &self,
        id: Uuid,
        allowed_from: &[CouponStatus],
        to: CouponStatus,
    ) -> Result<Option<Coupon>> {
        let allowed: Vec<String> = allowed_from.iter().map(|s| s.as_str().to_string()).collect();

        let row = sqlx::query_as::<_, CouponRow>(&format!(
            r#"
            UPDATE coupons
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(to)
        .bind(allowed)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Coupon::try_from(row).map(Some);
        }

        match self.get_by_id(id).await? {
            None => Ok(None),
            Some(current) => Err(CouponError::InvalidStatusTransition {
                from: current.status.to_string(),
                to: to.to_string(),
            }),
        }
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET status = 'expired', updated_at = NOW()
            WHERE status IN ('draft', 'active') AND end_date < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    async fn atomic_increment(
        &self,
        coupon_id: Uuid,
        request: &CommitRequest,
    ) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        // 行锁：同一张券的提交在此串行化
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1 FOR UPDATE"
        ))
        .bind(coupon_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(CommitOutcome::PreconditionFailed(Verdict::NotFound));
        };
        let coupon = Coupon::try_from(row)?;

        if let Some(existing) = RedemptionLedgerRepository::find_by_idempotency_key_in_tx(
            &mut tx,
            &request.idempotency_key,
        )
        .await?
        {
            return Ok(if existing.coupon_id == coupon_id {
                CommitOutcome::Replayed {
                    coupon,
                    record: existing,
                }
            } else {
                CommitOutcome::IdempotencyConflict { record: existing }
            });
        }

        let verdict = Verdict::evaluate(&coupon, request.now);
        if !verdict.is_valid() {
            debug!(verdict = verdict.label(), "锁内重评估不可用");
            return Ok(CommitOutcome::PreconditionFailed(verdict));
        }

        if let Some(payment) = &request.payment {
            let consumed = RedemptionLedgerRepository::find_by_payment_in_tx(
                &mut tx,
                &payment.gateway,
                &payment.order_id,
            )
            .await?;
            if let Some(existing) = consumed {
                return Ok(CommitOutcome::PaymentConsumed { record: existing });
            }
        }

        // 守卫式更新：计数只会在 active 且未用尽时 +1
        let updated = sqlx::query_as::<_, CouponRow>(&format!(
            r#"
            UPDATE coupons
            SET used_count = used_count + 1,
                status = CASE
                    WHEN NOT is_unlimited AND used_count + 1 >= max_uses THEN 'redeemed'
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'active'
              AND (is_unlimited OR used_count < max_uses)
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(coupon_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            return Err(CouponError::ConcurrencyConflict);
        };
        let coupon = Coupon::try_from(updated)?;
        let record = request.to_record(coupon_id, coupon.usage.used_count);

        match RedemptionLedgerRepository::insert_in_tx(&mut tx, &record).await {
            Ok(()) => {}
            // 唯一索引兜底：跨券并发使用同一幂等键或同一支付
            Err(CouponError::Database(e)) if Self::is_unique_violation(&e) => {
                return Err(CouponError::ConcurrencyConflict);
            }
            Err(e) => return Err(e),
        }

        tx.commit().await?;

        Ok(CommitOutcome::Committed { coupon, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CouponValue, Usage, Validity};
    use crate::repository::RedemptionLedger;
    use chrono::Duration;

    async fn setup() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        sqlx::migrate!("../../migrations").run(&pool).await.ok()?;
        Some(pool)
    }

    fn new_coupon(max_uses: i32) -> Coupon {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Coupon {
            id,
            code: format!("PG{}", &id.simple().to_string()[..12]).to_uppercase(),
            title: "pg test".to_string(),
            category: "discount".to_string(),
            value: CouponValue::Flat { amount: 20_000 },
            validity: Validity {
                start_date: now - Duration::days(1),
                end_date: now + Duration::days(1),
            },
            usage: Usage::limited(max_uses),
            status: CouponStatus::Active,
            owner_scope: None,
            qr_token: id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn commit_request(key: &str) -> CommitRequest {
        CommitRequest {
            record_id: Uuid::new_v4(),
            redeemed_by: "partner-1".to_string(),
            location: None,
            notes: None,
            idempotency_key: key.to_string(),
            payment: None,
            now: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_pg_concurrent_commits_respect_max_uses() {
        let Some(pool) = setup().await else { return };
        let repo = std::sync::Arc::new(CouponRepository::new(pool.clone()));
        let ledger = RedemptionLedgerRepository::new(pool);
        let coupon = repo.create(&new_coupon(5)).await.unwrap();

        let tasks = (0..20).map(|i| {
            let repo = repo.clone();
            let key = format!("{}-{}", coupon.id, i);
            tokio::spawn(async move {
                repo.atomic_increment(coupon.id, &commit_request(&key)).await
            })
        });
        let results = futures::future::join_all(tasks).await;
        let committed = results
            .into_iter()
            .filter(|r| {
                matches!(
                    r.as_ref().unwrap(),
                    Ok(CommitOutcome::Committed { .. })
                )
            })
            .count();

        assert_eq!(committed, 5);
        let stored = repo.get_by_id(coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.usage.used_count, 5);
        assert_eq!(stored.status, CouponStatus::Redeemed);
        assert_eq!(ledger.count_by_coupon(coupon.id).await.unwrap(), 5);
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_pg_replay_same_key() {
        let Some(pool) = setup().await else { return };
        let repo = CouponRepository::new(pool);
        let coupon = repo.create(&new_coupon(3)).await.unwrap();
        let key = format!("replay-{}", coupon.id);

        let first = repo
            .atomic_increment(coupon.id, &commit_request(&key))
            .await
            .unwrap();
        let second = repo
            .atomic_increment(coupon.id, &commit_request(&key))
            .await
            .unwrap();

        assert!(matches!(first, CommitOutcome::Committed { .. }));
        match second {
            CommitOutcome::Replayed { coupon, record } => {
                assert_eq!(coupon.usage.used_count, 1);
                assert_eq!(record.used_count_after, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
