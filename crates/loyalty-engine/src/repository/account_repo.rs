//! 会员账户仓储
//!
//! 账户的开户、定级变更和资格年度推进

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use super::traits::AccountRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    LoyaltyAccount, Tier, TierChangeReason, TierHistory, TierMetrics, TierReview,
    qualification_year_from,
};

/// 会员账户仓储
pub struct AccountRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct TierHistoryRow {
    id: i64,
    account_id: i64,
    from_tier: Tier,
    to_tier: Tier,
    metrics: Json<TierMetrics>,
    reason: TierChangeReason,
    created_at: DateTime<Utc>,
}

impl From<TierHistoryRow> for TierHistory {
    fn from(row: TierHistoryRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            from_tier: row.from_tier,
            to_tier: row.to_tier,
            metrics: row.metrics.0,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中锁定账户行
    pub async fn get_for_update(
        conn: &mut PgConnection,
        account_id: i64,
    ) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            SELECT id, user_id, tier, points, lifetime_stays, lifetime_nights, lifetime_spend,
                   qualification_year_start, qualification_year_end, created_at, updated_at
            FROM loyalty_accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .fetch_optional(conn)
        .await?;

        Ok(account)
    }
}

#[async_trait]
impl AccountRepositoryTrait for AccountRepository {
    async fn get_account(&self, account_id: i64) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            SELECT id, user_id, tier, points, lifetime_stays, lifetime_nights, lifetime_spend,
                   qualification_year_start, qualification_year_end, created_at, updated_at
            FROM loyalty_accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_account_by_user(&self, user_id: &str) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            SELECT id, user_id, tier, points, lifetime_stays, lifetime_nights, lifetime_spend,
                   qualification_year_start, qualification_year_end, created_at, updated_at
            FROM loyalty_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// 依赖 user_id 唯一约束实现幂等开户，并发开户时后到者读取已存在的记录
    async fn get_or_create_account(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<LoyaltyAccount> {
        let (start, end) = qualification_year_from(today);
        let created = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            INSERT INTO loyalty_accounts (user_id, tier, points, qualification_year_start, qualification_year_end)
            VALUES ($1, 'MEMBER', 0, $2, $3)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING id, user_id, tier, points, lifetime_stays, lifetime_nights, lifetime_spend,
                      qualification_year_start, qualification_year_end, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;

        match created {
            Some(account) => Ok(account),
            None => self
                .get_account_by_user(user_id)
                .await?
                .ok_or_else(|| LoyaltyError::AccountNotFound(user_id.to_string())),
        }
    }

    async fn count_members_by_tier(&self) -> Result<Vec<(Tier, i64)>> {
        let rows = sqlx::query_as::<_, (Tier, i64)>(
            r#"
            SELECT tier, COUNT(*)
            FROM loyalty_accounts
            GROUP BY tier
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn total_outstanding_points(&self) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(points), 0)::BIGINT FROM loyalty_accounts")
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    async fn list_due_for_requalification(
        &self,
        check_date: NaiveDate,
    ) -> Result<Vec<LoyaltyAccount>> {
        let accounts = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            SELECT id, user_id, tier, points, lifetime_stays, lifetime_nights, lifetime_spend,
                   qualification_year_start, qualification_year_end, created_at, updated_at
            FROM loyalty_accounts
            WHERE tier <> 'MEMBER' AND qualification_year_end <= $1
            ORDER BY id ASC
            "#,
        )
        .bind(check_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    /// 行锁内重新读取账户并定级，等级、审计记录与资格年度同一事务提交
    async fn apply_tier_review(
        &self,
        account_id: i64,
        review: &TierReview,
    ) -> Result<Option<TierHistory>> {
        let mut tx = self.pool.begin().await?;

        let account = Self::get_for_update(&mut *tx, account_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(account_id.to_string()))?;
        if !review.applies_to(&account) {
            tx.rollback().await?;
            return Ok(None);
        }

        if review.advance_year {
            let (start, end) = account.next_qualification_year();
            sqlx::query(
                r#"
                UPDATE loyalty_accounts
                SET qualification_year_start = $2, qualification_year_end = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(account_id)
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await?;
        }

        let Some(change) = review
            .ladder
            .evaluate_change(&account, review.policy, review.today)
        else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE loyalty_accounts
            SET tier = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(change.to_tier)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, TierHistoryRow>(
            r#"
            INSERT INTO tier_history (account_id, from_tier, to_tier, metrics, reason)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, account_id, from_tier, to_tier, metrics, reason, created_at
            "#,
        )
        .bind(account_id)
        .bind(change.from_tier)
        .bind(change.to_tier)
        .bind(Json(change.metrics))
        .bind(change.reason)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.into()))
    }

    async fn list_tier_history(&self, account_id: i64) -> Result<Vec<TierHistory>> {
        let rows = sqlx::query_as::<_, TierHistoryRow>(
            r#"
            SELECT id, account_id, from_tier, to_tier, metrics, reason, created_at
            FROM tier_history
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
