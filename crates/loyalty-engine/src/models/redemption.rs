//! 积分兑换商品与兑换交易

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{RedemptionStatus, RewardKind, Tier};
use super::rule::DateWindow;
use super::scope::Scope;

/// 动态定价调整方式
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingAdjustment {
    /// 直接设定所需积分
    SetPoints { points: i64 },
    /// 在当前所需积分上乘以倍数
    Multiply { multiplier: f64 },
}

/// 动态定价规则
///
/// 未配置的维度不参与匹配；按列表顺序逐条叠加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRule {
    pub room_type_id: Option<i64>,
    pub property_id: Option<i64>,
    /// 季节性时间段
    pub season: Option<DateWindow>,
    pub adjustment: PricingAdjustment,
}

/// 动态定价配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPricing {
    pub dynamic: bool,
    #[serde(default)]
    pub rules: Vec<PricingRule>,
}

/// 兑换奖励内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionValue {
    pub kind: RewardKind,
    pub amount: Option<f64>,
    /// 兑换后有效天数，为空表示不过期
    pub expires_in_days: Option<i64>,
}

impl RedemptionValue {
    /// 从兑换时间推算过期时间
    pub fn expires_at(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in_days.map(|days| from + Duration::days(days))
    }
}

/// 积分兑换商品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionItem {
    pub id: i64,
    pub name: String,
    pub base_points_required: i64,
    pub dynamic_pricing: DynamicPricing,
    /// 为空表示不限量
    pub total_quantity: Option<i64>,
    pub sold_quantity: i64,
    pub available_quantity: Option<i64>,
    pub tier_ids: Scope<Tier>,
    pub property_ids: Scope<i64>,
    pub room_type_ids: Scope<i64>,
    pub value: RedemptionValue,
    pub window: DateWindow,
    pub active: bool,
}

impl RedemptionItem {
    /// 剩余可兑换数量，`None` 表示不限量
    pub fn remaining(&self) -> Option<i64> {
        self.total_quantity.map(|total| {
            self.available_quantity
                .unwrap_or(total - self.sold_quantity)
        })
    }

    pub fn in_stock(&self) -> bool {
        self.remaining().is_none_or(|left| left > 0)
    }
}

/// 兑换交易
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionTransaction {
    pub id: i64,
    pub item_id: i64,
    pub loyalty_account_id: i64,
    pub points_redeemed: i64,
    pub status: RedemptionStatus,
    pub booking_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 兑换提交单元：扣积分、记流水、减库存、建交易在同一事务内完成
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionCommit {
    pub item_id: i64,
    pub loyalty_account_id: i64,
    pub points: i64,
    pub booking_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}
