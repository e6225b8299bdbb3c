//! 外部预订系统提供的预订快照
//!
//! 预订生命周期由外部系统管理，积分引擎只读

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::enums::{BookingSource, BookingStatus};

/// 预订快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BookingSnapshot {
    pub booking_id: i64,
    pub user_id: String,
    pub room_revenue: f64,
    pub add_on_revenue: f64,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub source: BookingSource,
    pub property_id: i64,
    #[sqlx(default)]
    pub room_type_id: Option<i64>,
    pub is_prepaid: bool,
    #[sqlx(default)]
    pub room_type_category: Option<String>,
    pub confirmation_number: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl BookingSnapshot {
    pub fn total_revenue(&self) -> f64 {
        self.room_revenue + self.add_on_revenue
    }

    pub fn stay_length(&self) -> i64 {
        stay_length(self.check_in, self.check_out)
    }
}

/// 入住晚数：按天向上取整，不足一天按一天计
pub fn stay_length(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> i64 {
    let seconds = (check_out - check_in).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + 86_399) / 86_400
}

/// 周五、周六、周日入住视为周末
pub fn is_weekend_check_in(check_in: DateTime<Utc>) -> bool {
    matches!(check_in.weekday(), Weekday::Fri | Weekday::Sat | Weekday::Sun)
}
