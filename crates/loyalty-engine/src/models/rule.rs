//! 积分规则与营销活动
//!
//! 存储层的条件/动作是 JSON，加载时一次性解析为带标签的枚举，
//! 格式错误（如缺少 `type`）在加载阶段即报 `InvalidRule`。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{BookingSource, Tier};
use super::scope::Scope;
use crate::error::{LoyaltyError, Result};

/// 生效时间窗口，两端均可为空（不限）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// 包含端点
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| at >= s) && self.end.is_none_or(|e| at <= e)
    }
}

/// 积分规则的单个条件
///
/// 同一规则的所有条件必须同时满足（AND 语义）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCondition {
    Source { source: BookingSource },
    StayLength { min: Option<i64>, max: Option<i64> },
    Weekend { is_weekend: bool },
    DateRange { window: DateWindow },
    PropertyIn { property_ids: BTreeSet<i64> },
    TierIn { tiers: BTreeSet<Tier> },
    Prepaid { is_prepaid: bool },
    RoomTypeCategory { category: String },
}

/// 规则动作
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    /// 倍数累乘
    Multiplier { value: f64 },
    /// 额外积分，在取整后累加
    BonusPoints { value: i64 },
    /// 百分比加成，按 `1 + pct/100` 累乘
    Percentage { value: f64 },
}

/// 存储层条件对象（各字段可选）
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StoredConditions {
    source: Option<BookingSource>,
    stay_length: Option<StoredRange>,
    is_weekend: Option<bool>,
    date_range: Option<DateWindow>,
    #[serde(default)]
    property_ids: Vec<i64>,
    #[serde(default)]
    tier_ids: Vec<Tier>,
    is_prepaid: Option<bool>,
    room_type_category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoredRange {
    min: Option<i64>,
    max: Option<i64>,
}

/// 将存储层的条件对象解析为条件列表
///
/// 只生成实际配置的字段；空列表不产生条件
pub fn parse_conditions(raw: &Value) -> Result<Vec<RuleCondition>> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let stored: StoredConditions = serde_json::from_value(raw.clone())
        .map_err(|e| LoyaltyError::InvalidRule(format!("conditions: {}", e)))?;

    let mut conditions = Vec::new();
    if let Some(source) = stored.source {
        conditions.push(RuleCondition::Source { source });
    }
    if let Some(range) = stored.stay_length {
        if range.min.is_some() || range.max.is_some() {
            conditions.push(RuleCondition::StayLength {
                min: range.min,
                max: range.max,
            });
        }
    }
    if let Some(is_weekend) = stored.is_weekend {
        conditions.push(RuleCondition::Weekend { is_weekend });
    }
    if let Some(window) = stored.date_range {
        conditions.push(RuleCondition::DateRange { window });
    }
    if !stored.property_ids.is_empty() {
        conditions.push(RuleCondition::PropertyIn {
            property_ids: stored.property_ids.into_iter().collect(),
        });
    }
    if !stored.tier_ids.is_empty() {
        conditions.push(RuleCondition::TierIn {
            tiers: stored.tier_ids.into_iter().collect(),
        });
    }
    if let Some(is_prepaid) = stored.is_prepaid {
        conditions.push(RuleCondition::Prepaid { is_prepaid });
    }
    if let Some(category) = stored.room_type_category {
        conditions.push(RuleCondition::RoomTypeCategory { category });
    }
    Ok(conditions)
}

/// 解析规则动作，缺少 `type` 或数值非法时报错
pub fn parse_action(raw: &Value) -> Result<RuleAction> {
    if raw.get("type").is_none() {
        return Err(LoyaltyError::InvalidRule("rules.type is required".to_string()));
    }
    let action: RuleAction = serde_json::from_value(raw.clone())
        .map_err(|e| LoyaltyError::InvalidRule(format!("actions: {}", e)))?;
    match action {
        RuleAction::Multiplier { value } | RuleAction::Percentage { value }
            if !value.is_finite() =>
        {
            Err(LoyaltyError::InvalidRule(format!("actions.value must be finite: {}", value)))
        }
        RuleAction::Multiplier { value } if value < 0.0 => Err(LoyaltyError::InvalidRule(
            format!("multiplier must be non-negative: {}", value),
        )),
        _ => Ok(action),
    }
}

/// 积分规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsRule {
    pub id: i64,
    pub name: String,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
    /// 数值越大越先应用
    pub priority: i32,
    pub active: bool,
    pub window: DateWindow,
    pub property_ids: Scope<i64>,
    pub tier_ids: Scope<Tier>,
}

/// 营销活动加成
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRules {
    pub multiplier: Option<f64>,
    pub bonus_points: Option<i64>,
}

/// 营销活动：限时、限范围的倍数/奖励积分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub tier_ids: Scope<Tier>,
    pub property_ids: Scope<i64>,
    pub window: DateWindow,
    pub rules: CampaignRules,
    pub active: bool,
}
