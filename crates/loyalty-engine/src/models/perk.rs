//! 会员权益（Perk）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{BookingSource, PerkRedemptionStatus, Tier};
use super::rule::DateWindow;
use super::scope::Scope;

/// 权益领取条件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerkConditions {
    /// 最低等级
    pub min_tier: Option<Tier>,
    pub booking_source: Option<BookingSource>,
    pub min_stay_length: Option<i64>,
    pub max_stay_length: Option<i64>,
    /// 权益自身的有效期
    #[serde(default)]
    pub window: DateWindow,
}

/// 权益面值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerkValue {
    /// 折算金额，无金额类权益（如延迟退房）为空
    pub amount: Option<f64>,
    pub description: Option<String>,
}

/// 会员权益
///
/// 三类容量限制相互独立：全局总量、每会员次数、每次入住次数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perk {
    pub id: i64,
    pub name: String,
    pub conditions: PerkConditions,
    pub tier_ids: Scope<Tier>,
    pub property_ids: Scope<i64>,
    pub total_capacity: Option<i64>,
    pub max_usage_per_member: Option<i64>,
    pub max_usage_per_stay: Option<i64>,
    pub current_usage: i64,
    pub value: PerkValue,
    pub active: bool,
}

/// 权益容量上限（仓储层原子校验时使用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerkLimits {
    pub total_capacity: Option<i64>,
    pub max_usage_per_member: Option<i64>,
    pub max_usage_per_stay: Option<i64>,
}

impl From<&Perk> for PerkLimits {
    fn from(perk: &Perk) -> Self {
        Self {
            total_capacity: perk.total_capacity,
            max_usage_per_member: perk.max_usage_per_member,
            max_usage_per_stay: perk.max_usage_per_stay,
        }
    }
}

/// 权益领取记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PerkRedemption {
    pub id: i64,
    pub perk_id: i64,
    pub loyalty_account_id: i64,
    pub booking_id: Option<i64>,
    pub status: PerkRedemptionStatus,
    pub value_applied: f64,
    pub created_at: DateTime<Utc>,
}

/// 待创建的领取记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewPerkRedemption {
    pub perk_id: i64,
    pub loyalty_account_id: i64,
    pub booking_id: Option<i64>,
    pub value_applied: f64,
}
