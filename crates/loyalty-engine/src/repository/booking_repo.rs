//! 预订快照仓储（只读）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::BookingDirectoryTrait;
use crate::error::Result;
use crate::models::BookingSnapshot;

/// 预订快照仓储
///
/// 数据由预订系统同步写入 booking_snapshots，积分引擎只读
pub struct BookingRepository {
    pool: PgPool,
}

impl BookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingDirectoryTrait for BookingRepository {
    async fn get_booking(&self, booking_id: i64) -> Result<Option<BookingSnapshot>> {
        let booking = sqlx::query_as::<_, BookingSnapshot>(
            r#"
            SELECT booking_id, user_id, room_revenue, add_on_revenue, check_in, check_out,
                   source, property_id, room_type_id, is_prepaid, room_type_category,
                   confirmation_number, status, created_at
            FROM booking_snapshots
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn count_user_bookings_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM booking_snapshots WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
