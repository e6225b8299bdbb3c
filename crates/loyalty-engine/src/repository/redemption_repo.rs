//! 兑换交易仓储
//!
//! 兑换提交：创建交易 -> 扣积分记流水 -> 条件扣减库存，同一事务内完成。
//! 库存扣减使用带条件的 UPDATE，影响行数为 0 即库存不足，整个事务回滚。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use super::ledger_repo::LedgerRepository;
use super::traits::RedemptionRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    LedgerReason, LedgerReferences, PointsLedgerEntry, PointsMutation, RedemptionCommit,
    RedemptionStatus, RedemptionTransaction,
};

/// 兑换交易仓储
pub struct RedemptionRepository {
    pool: PgPool,
}

impl RedemptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中扣减商品库存
    ///
    /// 不限量商品只累计已售数量
    pub async fn decrement_inventory_in_tx(conn: &mut PgConnection, item_id: i64) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE redemption_items
            SET sold_quantity = sold_quantity + 1,
                available_quantity = available_quantity - 1
            WHERE id = $1
              AND (total_quantity IS NULL
                   OR COALESCE(available_quantity, total_quantity - sold_quantity) > 0)
            "#,
        )
        .bind(item_id)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM redemption_items WHERE id = $1)")
                    .bind(item_id)
                    .fetch_one(&mut *conn)
                    .await?;
            return Err(if exists {
                LoyaltyError::OutOfStock(item_id)
            } else {
                LoyaltyError::ItemNotFound(item_id)
            });
        }
        Ok(())
    }

    /// 在事务中恢复商品库存
    pub async fn restore_inventory_in_tx(conn: &mut PgConnection, item_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE redemption_items
            SET sold_quantity = GREATEST(sold_quantity - 1, 0),
                available_quantity = available_quantity + 1
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    async fn get_for_update(
        conn: &mut PgConnection,
        transaction_id: i64,
    ) -> Result<Option<RedemptionTransaction>> {
        let transaction = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            SELECT id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                   expires_at, used_at, created_at, updated_at
            FROM redemption_transactions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(conn)
        .await?;

        Ok(transaction)
    }
}

#[async_trait]
impl RedemptionRepositoryTrait for RedemptionRepository {
    async fn commit(
        &self,
        commit: RedemptionCommit,
    ) -> Result<(RedemptionTransaction, PointsLedgerEntry)> {
        let mut tx = self.pool.begin().await?;

        let transaction = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            INSERT INTO redemption_transactions (item_id, loyalty_account_id, points_redeemed, status,
                                                 booking_id, expires_at)
            VALUES ($1, $2, $3, 'PENDING', $4, $5)
            RETURNING id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                      expires_at, used_at, created_at, updated_at
            "#,
        )
        .bind(commit.item_id)
        .bind(commit.loyalty_account_id)
        .bind(commit.points)
        .bind(commit.booking_id)
        .bind(commit.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        let mutation = PointsMutation::debit(
            commit.loyalty_account_id,
            commit.points,
            LedgerReason::Redemption,
        )
        .with_description(commit.description.clone())
        .with_references(LedgerReferences {
            booking_id: commit.booking_id,
            redemption_transaction_id: Some(transaction.id),
            ..Default::default()
        });
        let entry = LedgerRepository::apply_in_tx(&mut tx, &mutation).await?;

        Self::decrement_inventory_in_tx(&mut tx, commit.item_id).await?;

        tx.commit().await?;

        debug!(
            transaction_id = transaction.id,
            item_id = commit.item_id,
            points = commit.points,
            "兑换交易已提交"
        );
        Ok((transaction, entry))
    }

    async fn get_transaction(&self, transaction_id: i64) -> Result<Option<RedemptionTransaction>> {
        let transaction = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            SELECT id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                   expires_at, used_at, created_at, updated_at
            FROM redemption_transactions
            WHERE id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn update_status(
        &self,
        transaction_id: i64,
        expected: RedemptionStatus,
        next: RedemptionStatus,
        used_at: Option<DateTime<Utc>>,
    ) -> Result<RedemptionTransaction> {
        let updated = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            UPDATE redemption_transactions
            SET status = $3, used_at = COALESCE(used_at, $4), updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                      expires_at, used_at, created_at, updated_at
            "#,
        )
        .bind(transaction_id)
        .bind(expected)
        .bind(next)
        .bind(used_at)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(transaction) => Ok(transaction),
            None => match self.get_transaction(transaction_id).await? {
                Some(_) => Err(LoyaltyError::ConcurrencyConflict),
                None => Err(LoyaltyError::TransactionNotFound(transaction_id)),
            },
        }
    }

    async fn cancel_with_refund(
        &self,
        transaction_id: i64,
        expected: RedemptionStatus,
    ) -> Result<(RedemptionTransaction, PointsLedgerEntry)> {
        let mut tx = self.pool.begin().await?;

        let current = Self::get_for_update(&mut tx, transaction_id)
            .await?
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))?;
        if current.status != expected {
            return Err(LoyaltyError::ConcurrencyConflict);
        }

        let mutation = PointsMutation::credit(
            current.loyalty_account_id,
            current.points_redeemed,
            LedgerReason::RedemptionRefund,
        )
        .with_references(LedgerReferences {
            booking_id: current.booking_id,
            redemption_transaction_id: Some(transaction_id),
            ..Default::default()
        });
        let entry = LedgerRepository::apply_in_tx(&mut tx, &mutation).await?;

        Self::restore_inventory_in_tx(&mut tx, current.item_id).await?;

        let transaction = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            UPDATE redemption_transactions
            SET status = 'CANCELLED', updated_at = NOW()
            WHERE id = $1
            RETURNING id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                      expires_at, used_at, created_at, updated_at
            "#,
        )
        .bind(transaction_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((transaction, entry))
    }

    async fn list_by_account(&self, account_id: i64) -> Result<Vec<RedemptionTransaction>> {
        let transactions = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            SELECT id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                   expires_at, used_at, created_at, updated_at
            FROM redemption_transactions
            WHERE loyalty_account_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<RedemptionTransaction>> {
        let transactions = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            SELECT id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                   expires_at, used_at, created_at, updated_at
            FROM redemption_transactions
            WHERE status IN ('PENDING', 'CONFIRMED')
              AND expires_at IS NOT NULL
              AND expires_at < $1
            ORDER BY id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RedemptionTransaction>> {
        let transactions = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            SELECT id, item_id, loyalty_account_id, points_redeemed, status, booking_id,
                   expires_at, used_at, created_at, updated_at
            FROM redemption_transactions
            WHERE created_at >= $1 AND created_at <= $2
            ORDER BY id ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }
}
