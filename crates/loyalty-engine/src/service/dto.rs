//! 服务层数据传输对象
//!
//! 定义服务层入参与结果，与内部领域模型解耦

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    BookingSnapshot, BookingSource, FraudRecommendation, FraudSeverity, LedgerReason,
    LedgerReferences, PerkRedemption, PointsLedgerEntry, RedemptionItem, RedemptionStatus,
    RedemptionTransaction, Tier, TierHistory, TierMetrics,
};

// ==================== 积分计算 ====================

/// 积分计算入参
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatePointsParams {
    pub tier: Tier,
    pub room_revenue: f64,
    pub add_on_revenue: f64,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub source: BookingSource,
    pub property_id: i64,
    pub room_type_id: Option<i64>,
    pub is_prepaid: bool,
    pub room_type_category: Option<String>,
}

impl CalculatePointsParams {
    pub fn from_booking(booking: &BookingSnapshot, tier: Tier) -> Self {
        Self {
            tier,
            room_revenue: booking.room_revenue,
            add_on_revenue: booking.add_on_revenue,
            check_in: booking.check_in,
            check_out: booking.check_out,
            source: booking.source,
            property_id: booking.property_id,
            room_type_id: booking.room_type_id,
            is_prepaid: booking.is_prepaid,
            room_type_category: booking.room_type_category.clone(),
        }
    }

    pub fn total_revenue(&self) -> f64 {
        self.room_revenue + self.add_on_revenue
    }
}

/// 加成来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentSource {
    Rule,
    Campaign,
}

/// 一条命中的规则或活动及其贡献
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedAdjustment {
    pub source: AdjustmentSource,
    pub id: i64,
    pub name: String,
    /// 本条贡献的倍数（百分比已换算为倍数）
    pub multiplier: Option<f64>,
    pub bonus_points: Option<i64>,
}

/// 积分计算结果（含审计明细）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsCalculation {
    pub base_points: i64,
    pub multiplier: f64,
    pub bonus_points: i64,
    pub total_points: i64,
    pub stay_length: i64,
    pub is_weekend: bool,
    /// 渠道不累积积分
    pub excluded_source: bool,
    pub adjustments: Vec<AppliedAdjustment>,
}

impl PointsCalculation {
    /// 不累积积分渠道的零结果
    pub fn excluded(stay_length: i64, is_weekend: bool) -> Self {
        Self {
            base_points: 0,
            multiplier: 1.0,
            bonus_points: 0,
            total_points: 0,
            stay_length,
            is_weekend,
            excluded_source: true,
            adjustments: Vec::new(),
        }
    }

    pub fn rule_ids(&self) -> Vec<i64> {
        self.ids_of(AdjustmentSource::Rule)
    }

    pub fn campaign_ids(&self) -> Vec<i64> {
        self.ids_of(AdjustmentSource::Campaign)
    }

    fn ids_of(&self, source: AdjustmentSource) -> Vec<i64> {
        self.adjustments
            .iter()
            .filter(|a| a.source == source)
            .map(|a| a.id)
            .collect()
    }
}

// ==================== 积分账本 ====================

/// 积分入账请求
#[derive(Debug, Clone, Validate)]
pub struct AwardPointsRequest {
    pub account_id: i64,
    pub points: i64,
    pub reason: LedgerReason,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub references: LedgerReferences,
}

impl AwardPointsRequest {
    pub fn new(account_id: i64, points: i64, reason: LedgerReason) -> Self {
        Self {
            account_id,
            points,
            reason,
            description: None,
            references: LedgerReferences::default(),
        }
    }
}

/// 积分扣减请求
#[derive(Debug, Clone, Validate)]
pub struct RedeemPointsRequest {
    pub account_id: i64,
    pub points: i64,
    pub reason: LedgerReason,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub references: LedgerReferences,
}

impl RedeemPointsRequest {
    pub fn new(account_id: i64, points: i64, reason: LedgerReason) -> Self {
        Self {
            account_id,
            points,
            reason,
            description: None,
            references: LedgerReferences::default(),
        }
    }
}

/// 入账结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardPointsResult {
    pub entry: PointsLedgerEntry,
    /// 入账后触发的升级
    pub tier_change: Option<TierHistory>,
}

/// 预订入账结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingAward {
    Awarded {
        entry: PointsLedgerEntry,
        calculation: PointsCalculation,
        tier_change: Option<TierHistory>,
    },
    /// 该预订已入账，返回首次入账的流水
    AlreadyAwarded { entry: PointsLedgerEntry },
}

impl BookingAward {
    pub fn entry(&self) -> &PointsLedgerEntry {
        match self {
            Self::Awarded { entry, .. } | Self::AlreadyAwarded { entry } => entry,
        }
    }
}

// ==================== 等级 ====================

pub use crate::models::DowngradePolicy;

/// 单个账户的重新定级失败
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequalificationError {
    pub account_id: i64,
    pub error: String,
}

/// 重新定级批处理汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequalificationSummary {
    pub checked: usize,
    pub upgraded: usize,
    pub downgraded: usize,
    pub unchanged: usize,
    pub errors: Vec<RequalificationError>,
}

/// 定级指标维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierCriterion {
    Points,
    Stays,
    Nights,
    Spend,
}

/// 距下一等级某项门槛的差距
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdGap {
    pub criterion: TierCriterion,
    pub required: f64,
    pub current: f64,
    pub remaining: f64,
}

/// 等级进度
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierProgress {
    pub account_id: i64,
    pub current_tier: Tier,
    pub next_tier: Option<Tier>,
    pub metrics: TierMetrics,
    /// 任一项差距归零即可升级
    pub gaps: Vec<ThresholdGap>,
}

// ==================== 权益 ====================

/// 权益评估上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerkContext {
    pub member_tier: Tier,
    pub booking_source: Option<BookingSource>,
    pub stay_length: Option<i64>,
    pub property_id: Option<i64>,
    pub at: DateTime<Utc>,
}

impl PerkContext {
    pub fn for_booking(booking: &BookingSnapshot, member_tier: Tier) -> Self {
        Self {
            member_tier,
            booking_source: Some(booking.source),
            stay_length: Some(booking.stay_length()),
            property_id: Some(booking.property_id),
            at: booking.check_in,
        }
    }
}

/// 容量检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityCheck {
    pub available: bool,
    pub reason: Option<String>,
}

impl CapacityCheck {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }
}

/// 权益领取请求
#[derive(Debug, Clone, PartialEq)]
pub struct RedeemPerkRequest {
    pub perk_id: i64,
    pub loyalty_account_id: i64,
    pub booking_id: Option<i64>,
}

/// 自动发放时跳过的权益
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedPerk {
    pub perk_id: i64,
    pub reason: String,
}

/// 预订自动发放权益的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerkApplication {
    pub applied: Vec<PerkRedemption>,
    pub skipped: Vec<SkippedPerk>,
}

// ==================== 兑换 ====================

/// 兑换上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionContext {
    pub room_type_id: Option<i64>,
    pub property_id: Option<i64>,
    pub booking_id: Option<i64>,
    pub at: DateTime<Utc>,
}

impl RedemptionContext {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            room_type_id: None,
            property_id: None,
            booking_id: None,
            at,
        }
    }
}

/// 兑换资格校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionValidation {
    pub valid: bool,
    pub reason: Option<String>,
    pub points_required: Option<i64>,
    pub points_available: Option<i64>,
}

impl RedemptionValidation {
    pub fn ok(points_required: i64, points_available: i64) -> Self {
        Self {
            valid: true,
            reason: None,
            points_required: Some(points_required),
            points_available: Some(points_available),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            points_required: None,
            points_available: None,
        }
    }
}

/// 兑换请求
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRedemptionRequest {
    pub loyalty_account_id: i64,
    pub item_id: i64,
    pub context: RedemptionContext,
}

/// 兑换凭证
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    pub transaction: RedemptionTransaction,
    pub ledger_entry: PointsLedgerEntry,
}

/// 取消兑换结果；重复取消时 refund 为空
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionCancellation {
    pub transaction: RedemptionTransaction,
    pub refund: Option<PointsLedgerEntry>,
}

/// 过期处理汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirySummary {
    pub checked: usize,
    pub expired: usize,
    pub errors: Vec<(i64, String)>,
}

/// 兑换目录条目
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub item: RedemptionItem,
    pub points_required: i64,
    pub affordable: bool,
    pub in_stock: bool,
}

// ==================== 风控 ====================

/// 待评估的积分交易
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudCheckTransaction {
    pub points: i64,
    pub booking_id: Option<i64>,
}

/// 风控标记类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudFlagKind {
    LargePointsAward,
    RapidAccumulation,
    ExcessiveBookings,
    PointsFromCancelled,
}

impl FraudFlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LargePointsAward => "LARGE_POINTS_AWARD",
            Self::RapidAccumulation => "RAPID_ACCUMULATION",
            Self::ExcessiveBookings => "EXCESSIVE_BOOKINGS",
            Self::PointsFromCancelled => "POINTS_FROM_CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudFlag {
    pub flag: FraudFlagKind,
    pub severity: FraudSeverity,
    pub detail: String,
}

/// 风控评估报告（仅供参考）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudReport {
    pub account_id: i64,
    pub flags: Vec<FraudFlag>,
    pub risk_score: u32,
    pub recommendation: FraudRecommendation,
}

// ==================== 运营分析 ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerkUsage {
    pub perk_id: i64,
    pub redemptions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopEarner {
    pub account_id: i64,
    pub points_earned: i64,
}

/// 运营分析报表
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_members: i64,
    pub members_by_tier: BTreeMap<Tier, i64>,
    /// 全部账户未使用积分（负债）
    pub outstanding_points: i64,
    pub points_awarded: i64,
    pub points_redeemed: i64,
    pub points_refunded: i64,
    pub redemptions_by_status: BTreeMap<RedemptionStatus, i64>,
    pub perk_usage: Vec<PerkUsage>,
    pub top_earners: Vec<TopEarner>,
}
