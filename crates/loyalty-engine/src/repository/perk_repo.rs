//! 权益领取仓储
//!
//! 领取时锁定权益行（FOR UPDATE），同一权益的容量校验与计数递增串行执行，
//! 避免并发抢最后一个名额时超发。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::traits::PerkRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{NewPerkRedemption, PerkLimits, PerkRedemption};

/// 权益领取仓储
pub struct PerkRepository {
    pool: PgPool,
}

impl PerkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count_member_usage_in_tx(
        conn: &mut PgConnection,
        perk_id: i64,
        account_id: i64,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM perk_redemptions
            WHERE perk_id = $1 AND loyalty_account_id = $2 AND status IN ('ACTIVE', 'USED')
            "#,
        )
        .bind(perk_id)
        .bind(account_id)
        .fetch_one(conn)
        .await?;

        Ok(count)
    }

    async fn count_stay_usage_in_tx(
        conn: &mut PgConnection,
        perk_id: i64,
        booking_id: i64,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM perk_redemptions
            WHERE perk_id = $1 AND booking_id = $2 AND status IN ('ACTIVE', 'USED')
            "#,
        )
        .bind(perk_id)
        .bind(booking_id)
        .fetch_one(conn)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl PerkRepositoryTrait for PerkRepository {
    async fn count_member_usage(&self, perk_id: i64, account_id: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::count_member_usage_in_tx(&mut conn, perk_id, account_id).await
    }

    async fn count_stay_usage(&self, perk_id: i64, booking_id: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::count_stay_usage_in_tx(&mut conn, perk_id, booking_id).await
    }

    async fn reserve(
        &self,
        redemption: NewPerkRedemption,
        limits: PerkLimits,
    ) -> Result<PerkRedemption> {
        let mut tx = self.pool.begin().await?;

        let current_usage: Option<i64> =
            sqlx::query_scalar("SELECT current_usage FROM perks WHERE id = $1 FOR UPDATE")
                .bind(redemption.perk_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current_usage = current_usage.ok_or(LoyaltyError::PerkNotFound(redemption.perk_id))?;

        if limits.total_capacity.is_some_and(|cap| current_usage >= cap) {
            return Err(LoyaltyError::CapacityExceeded {
                reason: "Perk capacity reached".to_string(),
            });
        }

        if let Some(max) = limits.max_usage_per_member {
            let used = Self::count_member_usage_in_tx(
                &mut tx,
                redemption.perk_id,
                redemption.loyalty_account_id,
            )
            .await?;
            if used >= max {
                return Err(LoyaltyError::CapacityExceeded {
                    reason: "Member limit reached".to_string(),
                });
            }
        }

        if let (Some(max), Some(booking_id)) = (limits.max_usage_per_stay, redemption.booking_id) {
            let used = Self::count_stay_usage_in_tx(&mut tx, redemption.perk_id, booking_id).await?;
            if used >= max {
                return Err(LoyaltyError::CapacityExceeded {
                    reason: "Stay limit reached".to_string(),
                });
            }
        }

        let record = sqlx::query_as::<_, PerkRedemption>(
            r#"
            INSERT INTO perk_redemptions (perk_id, loyalty_account_id, booking_id, status, value_applied)
            VALUES ($1, $2, $3, 'ACTIVE', $4)
            RETURNING id, perk_id, loyalty_account_id, booking_id, status, value_applied, created_at
            "#,
        )
        .bind(redemption.perk_id)
        .bind(redemption.loyalty_account_id)
        .bind(redemption.booking_id)
        .bind(redemption.value_applied)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE perks SET current_usage = current_usage + 1 WHERE id = $1")
            .bind(redemption.perk_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn list_by_account(&self, account_id: i64) -> Result<Vec<PerkRedemption>> {
        let records = sqlx::query_as::<_, PerkRedemption>(
            r#"
            SELECT id, perk_id, loyalty_account_id, booking_id, status, value_applied, created_at
            FROM perk_redemptions
            WHERE loyalty_account_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PerkRedemption>> {
        let records = sqlx::query_as::<_, PerkRedemption>(
            r#"
            SELECT id, perk_id, loyalty_account_id, booking_id, status, value_applied, created_at
            FROM perk_redemptions
            WHERE created_at >= $1 AND created_at <= $2
            ORDER BY id ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
