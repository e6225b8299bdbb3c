//! 配置仓储
//!
//! 读取等级、积分规则、营销活动、权益和兑换商品配置。
//! JSONB 字段与范围数组在这里一次性转换为领域类型，格式错误报 `InvalidRule`。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::PgPool;

use super::traits::ConfigRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    Campaign, CampaignRules, DateWindow, DynamicPricing, Perk, PerkConditions, PerkValue,
    PointsRule, RedemptionItem, RedemptionValue, Scope, Tier, TierConfig, parse_action,
    parse_conditions,
};

/// 配置仓储
pub struct ConfigRepository {
    pool: PgPool,
}

impl ConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 等级范围：空数组表示不限
fn tier_scope(values: Vec<String>) -> Result<Scope<Tier>> {
    let tiers = values
        .iter()
        .map(|v| v.parse::<Tier>().map_err(LoyaltyError::InvalidRule))
        .collect::<Result<Vec<_>>>()?;
    Ok(Scope::from_list(tiers))
}

fn decode_json<T: DeserializeOwned>(field: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| LoyaltyError::InvalidRule(format!("{}: {}", field, e)))
}

#[derive(sqlx::FromRow)]
struct PointsRuleRow {
    id: i64,
    name: String,
    conditions: Value,
    actions: Value,
    priority: i32,
    active: bool,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    property_ids: Vec<i64>,
    tier_ids: Vec<String>,
}

impl TryFrom<PointsRuleRow> for PointsRule {
    type Error = LoyaltyError;

    fn try_from(row: PointsRuleRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            conditions: parse_conditions(&row.conditions)?,
            action: parse_action(&row.actions)?,
            priority: row.priority,
            active: row.active,
            window: DateWindow::new(row.start_date, row.end_date),
            property_ids: Scope::from_list(row.property_ids),
            tier_ids: tier_scope(row.tier_ids)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: i64,
    name: String,
    tier_ids: Vec<String>,
    property_ids: Vec<i64>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    rules: Value,
    active: bool,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = LoyaltyError;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let rules: CampaignRules = decode_json("campaigns.rules", row.rules)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            tier_ids: tier_scope(row.tier_ids)?,
            property_ids: Scope::from_list(row.property_ids),
            window: DateWindow::new(row.start_date, row.end_date),
            rules,
            active: row.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PerkRow {
    id: i64,
    name: String,
    conditions: Value,
    tier_ids: Vec<String>,
    property_ids: Vec<i64>,
    total_capacity: Option<i64>,
    max_usage_per_member: Option<i64>,
    max_usage_per_stay: Option<i64>,
    current_usage: i64,
    value: Value,
    active: bool,
}

impl TryFrom<PerkRow> for Perk {
    type Error = LoyaltyError;

    fn try_from(row: PerkRow) -> Result<Self> {
        let conditions: PerkConditions = decode_json("perks.conditions", row.conditions)?;
        let value: PerkValue = decode_json("perks.value", row.value)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            conditions,
            tier_ids: tier_scope(row.tier_ids)?,
            property_ids: Scope::from_list(row.property_ids),
            total_capacity: row.total_capacity,
            max_usage_per_member: row.max_usage_per_member,
            max_usage_per_stay: row.max_usage_per_stay,
            current_usage: row.current_usage,
            value,
            active: row.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RedemptionItemRow {
    id: i64,
    name: String,
    base_points_required: i64,
    dynamic_pricing: Value,
    total_quantity: Option<i64>,
    sold_quantity: i64,
    available_quantity: Option<i64>,
    tier_ids: Vec<String>,
    property_ids: Vec<i64>,
    room_type_ids: Vec<i64>,
    value: Value,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    active: bool,
}

impl TryFrom<RedemptionItemRow> for RedemptionItem {
    type Error = LoyaltyError;

    fn try_from(row: RedemptionItemRow) -> Result<Self> {
        let dynamic_pricing: DynamicPricing =
            decode_json("redemption_items.dynamic_pricing", row.dynamic_pricing)?;
        let value: RedemptionValue = decode_json("redemption_items.value", row.value)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            base_points_required: row.base_points_required,
            dynamic_pricing,
            total_quantity: row.total_quantity,
            sold_quantity: row.sold_quantity,
            available_quantity: row.available_quantity,
            tier_ids: tier_scope(row.tier_ids)?,
            property_ids: Scope::from_list(row.property_ids),
            room_type_ids: Scope::from_list(row.room_type_ids),
            value,
            window: DateWindow::new(row.start_date, row.end_date),
            active: row.active,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = LoyaltyError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl ConfigRepositoryTrait for ConfigRepository {
    async fn list_tier_configs(&self) -> Result<Vec<TierConfig>> {
        let configs = sqlx::query_as::<_, TierConfig>(
            r#"
            SELECT tier, sort_order, min_points, min_stays, min_nights, min_spend,
                   base_points_per_100, active
            FROM tier_configs
            ORDER BY sort_order ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(configs)
    }

    async fn list_active_points_rules(&self, at: DateTime<Utc>) -> Result<Vec<PointsRule>> {
        let rows = sqlx::query_as::<_, PointsRuleRow>(
            r#"
            SELECT id, name, conditions, actions, priority, active, start_date, end_date,
                   property_ids, tier_ids
            FROM points_rules
            WHERE active = TRUE
              AND (start_date IS NULL OR start_date <= $1)
              AND (end_date IS NULL OR end_date >= $1)
            ORDER BY priority DESC, id ASC
            "#,
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn list_active_campaigns(&self, at: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT id, name, tier_ids, property_ids, start_date, end_date, rules, active
            FROM campaigns
            WHERE active = TRUE
              AND (start_date IS NULL OR start_date <= $1)
              AND (end_date IS NULL OR end_date >= $1)
            ORDER BY id ASC
            "#,
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn get_perk(&self, perk_id: i64) -> Result<Option<Perk>> {
        let row = sqlx::query_as::<_, PerkRow>(
            r#"
            SELECT id, name, conditions, tier_ids, property_ids, total_capacity,
                   max_usage_per_member, max_usage_per_stay, current_usage, value, active
            FROM perks
            WHERE id = $1
            "#,
        )
        .bind(perk_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Perk::try_from).transpose()
    }

    async fn list_active_perks(&self) -> Result<Vec<Perk>> {
        let rows = sqlx::query_as::<_, PerkRow>(
            r#"
            SELECT id, name, conditions, tier_ids, property_ids, total_capacity,
                   max_usage_per_member, max_usage_per_stay, current_usage, value, active
            FROM perks
            WHERE active = TRUE
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn get_redemption_item(&self, item_id: i64) -> Result<Option<RedemptionItem>> {
        let row = sqlx::query_as::<_, RedemptionItemRow>(
            r#"
            SELECT id, name, base_points_required, dynamic_pricing, total_quantity, sold_quantity,
                   available_quantity, tier_ids, property_ids, room_type_ids, value,
                   start_date, end_date, active
            FROM redemption_items
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RedemptionItem::try_from).transpose()
    }

    async fn list_active_redemption_items(&self) -> Result<Vec<RedemptionItem>> {
        let rows = sqlx::query_as::<_, RedemptionItemRow>(
            r#"
            SELECT id, name, base_points_required, dynamic_pricing, total_quantity, sold_quantity,
                   available_quantity, tier_ids, property_ids, room_type_ids, value,
                   start_date, end_date, active
            FROM redemption_items
            WHERE active = TRUE
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }
}
