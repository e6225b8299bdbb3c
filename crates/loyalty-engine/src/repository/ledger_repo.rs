//! 积分账本仓储
//!
//! 流水只追加不修改。余额回写与流水写入在同一事务中完成，
//! 账户行通过 `FOR UPDATE` 串行化，保证账本恒等式在并发下成立。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use super::account_repo::AccountRepository;
use super::traits::LedgerRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{LedgerReason, LedgerReferences, PointsLedgerEntry, PointsMutation};

/// 积分账本仓储
pub struct LedgerRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: i64,
    account_id: i64,
    points: i64,
    reason: LedgerReason,
    description: Option<String>,
    balance_before: i64,
    balance_after: i64,
    booking_id: Option<i64>,
    rule_ids: Vec<i64>,
    campaign_ids: Vec<i64>,
    perk_id: Option<i64>,
    redemption_transaction_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<LedgerRow> for PointsLedgerEntry {
    fn from(row: LedgerRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            points: row.points,
            reason: row.reason,
            description: row.description,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            references: LedgerReferences {
                booking_id: row.booking_id,
                rule_ids: row.rule_ids,
                campaign_ids: row.campaign_ids,
                perk_id: row.perk_id,
                redemption_transaction_id: row.redemption_transaction_id,
            },
            created_at: row.created_at,
        }
    }
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中执行一次积分变动
    ///
    /// 锁定账户行 -> 透支检查 -> 写流水 -> 回写余额和住宿指标。
    /// 调用方负责提交事务；任一步失败时丢弃事务即回滚。
    pub async fn apply_in_tx(
        conn: &mut PgConnection,
        mutation: &PointsMutation,
    ) -> Result<PointsLedgerEntry> {
        let account = AccountRepository::get_for_update(&mut *conn, mutation.account_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(mutation.account_id.to_string()))?;

        let balance_before = account.points;
        let balance_after = balance_before + mutation.delta;
        if balance_after < 0 {
            return Err(LoyaltyError::InsufficientPoints {
                required: -mutation.delta,
                available: balance_before,
            });
        }

        let refs = &mutation.references;
        let inserted = sqlx::query_as::<_, LedgerRow>(
            r#"
            INSERT INTO points_ledger (account_id, points, reason, description, balance_before, balance_after,
                                       booking_id, rule_ids, campaign_ids, perk_id, redemption_transaction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, account_id, points, reason, description, balance_before, balance_after,
                      booking_id, rule_ids, campaign_ids, perk_id, redemption_transaction_id, created_at
            "#,
        )
        .bind(mutation.account_id)
        .bind(mutation.delta)
        .bind(mutation.reason)
        .bind(&mutation.description)
        .bind(balance_before)
        .bind(balance_after)
        .bind(refs.booking_id)
        .bind(&refs.rule_ids)
        .bind(&refs.campaign_ids)
        .bind(refs.perk_id)
        .bind(refs.redemption_transaction_id)
        .fetch_one(&mut *conn)
        .await;

        let row = match inserted {
            Ok(row) => row,
            // 预订入账唯一索引冲突
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(LoyaltyError::DuplicateAward(refs.booking_id.unwrap_or_default()));
            }
            Err(e) => return Err(e.into()),
        };

        let stay = mutation.stay.unwrap_or_default();
        sqlx::query(
            r#"
            UPDATE loyalty_accounts
            SET points = $2,
                lifetime_stays = lifetime_stays + $3,
                lifetime_nights = lifetime_nights + $4,
                lifetime_spend = lifetime_spend + $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(mutation.account_id)
        .bind(balance_after)
        .bind(stay.stays)
        .bind(stay.nights)
        .bind(stay.spend)
        .execute(&mut *conn)
        .await?;

        debug!(
            account_id = mutation.account_id,
            delta = mutation.delta,
            balance_after,
            "积分流水已写入"
        );

        Ok(row.into())
    }

    pub async fn find_booking_entry(
        &self,
        booking_id: i64,
        reason: LedgerReason,
    ) -> Result<Option<PointsLedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, account_id, points, reason, description, balance_before, balance_after,
                   booking_id, rule_ids, campaign_ids, perk_id, redemption_transaction_id, created_at
            FROM points_ledger
            WHERE booking_id = $1 AND reason = $2
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(booking_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl LedgerRepositoryTrait for LedgerRepository {
    async fn apply_points(&self, mutation: PointsMutation) -> Result<PointsLedgerEntry> {
        if mutation.unique_per_booking {
            if let Some(booking_id) = mutation.references.booking_id {
                if self.find_booking_entry(booking_id, mutation.reason).await?.is_some() {
                    return Err(LoyaltyError::DuplicateAward(booking_id));
                }
            }
        }

        let mut tx = self.pool.begin().await?;
        let entry = Self::apply_in_tx(&mut tx, &mutation).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn list_entries(&self, account_id: i64, limit: i64) -> Result<Vec<PointsLedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, account_id, points, reason, description, balance_before, balance_after,
                   booking_id, rule_ids, campaign_ids, perk_id, redemption_transaction_id, created_at
            FROM points_ledger
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_entries_since(
        &self,
        account_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<PointsLedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, account_id, points, reason, description, balance_before, balance_after,
                   booking_id, rule_ids, campaign_ids, perk_id, redemption_transaction_id, created_at
            FROM points_ledger
            WHERE account_id = $1 AND created_at >= $2
            ORDER BY id ASC
            "#,
        )
        .bind(account_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PointsLedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, account_id, points, reason, description, balance_before, balance_after,
                   booking_id, rule_ids, campaign_ids, perk_id, redemption_transaction_id, created_at
            FROM points_ledger
            WHERE created_at >= $1 AND created_at <= $2
            ORDER BY id ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_booking_entry(
        &self,
        booking_id: i64,
        reason: LedgerReason,
    ) -> Result<Option<PointsLedgerEntry>> {
        self.find_booking_entry(booking_id, reason).await
    }
}
