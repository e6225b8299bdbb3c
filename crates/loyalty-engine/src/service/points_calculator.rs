//! 积分计算
//!
//! 基础积分 = floor(总收入 / 100 * 等级每百元积分)，
//! 再叠加命中的积分规则与营销活动：
//! - MULTIPLIER / PERCENTAGE 累乘到倍数上
//! - BONUS_POINTS 累加到额外积分上
//! - 最终积分 = floor(基础积分 * 倍数) + 额外积分，只取整一次
//!
//! OTA 渠道的预订不累积积分，与其他输入无关。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::error::{LoyaltyError, Result};
use crate::models::{
    BookingSource, Campaign, PointsRule, RuleAction, RuleCondition, Tier, is_weekend_check_in,
    stay_length,
};
use crate::repository::ConfigRepositoryTrait;
use crate::service::dto::{
    AdjustmentSource, AppliedAdjustment, CalculatePointsParams, PointsCalculation,
};

/// 规则匹配上下文
#[derive(Debug, Clone, PartialEq)]
pub struct RuleContext {
    pub tier: Tier,
    pub source: BookingSource,
    pub stay_length: i64,
    pub is_weekend: bool,
    pub check_in: DateTime<Utc>,
    pub property_id: i64,
    pub room_type_id: Option<i64>,
    pub is_prepaid: bool,
    pub room_type_category: Option<String>,
    pub total_revenue: f64,
}

impl From<&CalculatePointsParams> for RuleContext {
    fn from(params: &CalculatePointsParams) -> Self {
        Self {
            tier: params.tier,
            source: params.source,
            stay_length: stay_length(params.check_in, params.check_out),
            is_weekend: is_weekend_check_in(params.check_in),
            check_in: params.check_in,
            property_id: params.property_id,
            room_type_id: params.room_type_id,
            is_prepaid: params.is_prepaid,
            room_type_category: params.room_type_category.clone(),
            total_revenue: params.total_revenue(),
        }
    }
}

fn condition_matches(condition: &RuleCondition, ctx: &RuleContext) -> bool {
    match condition {
        RuleCondition::Source { source } => ctx.source == *source,
        RuleCondition::StayLength { min, max } => {
            min.is_none_or(|m| ctx.stay_length >= m) && max.is_none_or(|m| ctx.stay_length <= m)
        }
        RuleCondition::Weekend { is_weekend } => ctx.is_weekend == *is_weekend,
        RuleCondition::DateRange { window } => window.contains(ctx.check_in),
        RuleCondition::PropertyIn { property_ids } => property_ids.contains(&ctx.property_id),
        RuleCondition::TierIn { tiers } => tiers.contains(&ctx.tier),
        RuleCondition::Prepaid { is_prepaid } => ctx.is_prepaid == *is_prepaid,
        RuleCondition::RoomTypeCategory { category } => {
            ctx.room_type_category.as_deref() == Some(category.as_str())
        }
    }
}

/// 规则是否命中：启用、时间窗口、适用范围，以及全部条件（AND）
pub fn rule_matches(rule: &PointsRule, ctx: &RuleContext) -> bool {
    rule.active
        && rule.window.contains(ctx.check_in)
        && rule.property_ids.contains(&ctx.property_id)
        && rule.tier_ids.contains(&ctx.tier)
        && rule.conditions.iter().all(|c| condition_matches(c, ctx))
}

/// 活动是否适用
pub fn campaign_applies(campaign: &Campaign, ctx: &RuleContext) -> bool {
    campaign.active
        && campaign.window.contains(ctx.check_in)
        && campaign.tier_ids.contains(&ctx.tier)
        && campaign.property_ids.contains(&ctx.property_id)
}

/// 在基础积分上叠加规则与活动
///
/// 规则按 priority 降序应用，随后应用活动
pub fn apply_adjustments(
    base_points: i64,
    ctx: &RuleContext,
    rules: &[PointsRule],
    campaigns: &[Campaign],
) -> PointsCalculation {
    let mut ordered: Vec<&PointsRule> = rules.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

    let mut multiplier = 1.0_f64;
    let mut bonus_points = 0_i64;
    let mut adjustments = Vec::new();

    for rule in ordered.into_iter().filter(|r| rule_matches(r, ctx)) {
        let (applied_multiplier, applied_bonus) = match rule.action {
            RuleAction::Multiplier { value } => (Some(value), None),
            RuleAction::Percentage { value } => (Some(1.0 + value / 100.0), None),
            RuleAction::BonusPoints { value } => (None, Some(value)),
        };
        if let Some(m) = applied_multiplier {
            multiplier *= m;
        }
        if let Some(b) = applied_bonus {
            bonus_points += b;
        }
        adjustments.push(AppliedAdjustment {
            source: AdjustmentSource::Rule,
            id: rule.id,
            name: rule.name.clone(),
            multiplier: applied_multiplier,
            bonus_points: applied_bonus,
        });
    }

    for campaign in campaigns.iter().filter(|c| campaign_applies(c, ctx)) {
        let rules = campaign.rules;
        if rules.multiplier.is_none() && rules.bonus_points.is_none() {
            continue;
        }
        if let Some(m) = rules.multiplier {
            multiplier *= m;
        }
        if let Some(b) = rules.bonus_points {
            bonus_points += b;
        }
        adjustments.push(AppliedAdjustment {
            source: AdjustmentSource::Campaign,
            id: campaign.id,
            name: campaign.name.clone(),
            multiplier: rules.multiplier,
            bonus_points: rules.bonus_points,
        });
    }

    let total_points = ((base_points as f64 * multiplier).floor() as i64 + bonus_points).max(0);

    PointsCalculation {
        base_points,
        multiplier,
        bonus_points,
        total_points,
        stay_length: ctx.stay_length,
        is_weekend: ctx.is_weekend,
        excluded_source: false,
        adjustments,
    }
}

/// 积分计算器
pub struct PointsCalculator {
    config: Arc<dyn ConfigRepositoryTrait>,
    ota_sources: HashSet<BookingSource>,
}

impl PointsCalculator {
    pub fn new(config: Arc<dyn ConfigRepositoryTrait>, ota_sources: HashSet<BookingSource>) -> Self {
        Self {
            config,
            ota_sources,
        }
    }

    pub fn is_excluded_source(&self, source: BookingSource) -> bool {
        self.ota_sources.contains(&source)
    }

    /// 计算一笔预订可获得的积分
    #[instrument(skip(self, params), fields(tier = %params.tier, source = %params.source, property_id = params.property_id))]
    pub async fn calculate_points(&self, params: &CalculatePointsParams) -> Result<PointsCalculation> {
        let ctx = RuleContext::from(params);

        if self.is_excluded_source(params.source) {
            debug!("OTA 渠道不累积积分");
            return Ok(PointsCalculation::excluded(ctx.stay_length, ctx.is_weekend));
        }

        let tier_config = self
            .config
            .list_tier_configs()
            .await?
            .into_iter()
            .find(|c| c.tier == params.tier && c.active)
            .ok_or(LoyaltyError::TierConfigNotFound(params.tier))?;

        let base_points =
            (ctx.total_revenue / 100.0 * tier_config.base_points_per_100).floor() as i64;

        let rules = self.config.list_active_points_rules(params.check_in).await?;
        let campaigns = self.config.list_active_campaigns(params.check_in).await?;

        let calculation = apply_adjustments(base_points.max(0), &ctx, &rules, &campaigns);

        debug!(
            base_points = calculation.base_points,
            multiplier = calculation.multiplier,
            bonus_points = calculation.bonus_points,
            total_points = calculation.total_points,
            adjustments = calculation.adjustments.len(),
            "积分计算完成"
        );

        Ok(calculation)
    }
}
