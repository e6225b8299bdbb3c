//! 积分引擎领域模型
//!
//! 包含会员账户、积分账本、等级配置、积分规则、权益和兑换的核心实体定义

pub mod account;
pub mod booking;
pub mod enums;
pub mod perk;
pub mod redemption;
pub mod rule;
pub mod scope;
pub mod tier;

// 重新导出常用类型
pub use account::{
    LedgerReferences, LoyaltyAccount, PointsLedgerEntry, PointsMutation, StayDelta, TierChange,
    TierHistory, TierMetrics, qualification_year_from,
};
pub use booking::{BookingSnapshot, is_weekend_check_in, stay_length};
pub use enums::{
    BookingSource, BookingStatus, FraudRecommendation, FraudSeverity, LedgerReason,
    PerkRedemptionStatus, RedemptionStatus, RewardKind, Tier, TierChangeReason,
};
pub use perk::{NewPerkRedemption, Perk, PerkConditions, PerkLimits, PerkRedemption, PerkValue};
pub use redemption::{
    DynamicPricing, PricingAdjustment, PricingRule, RedemptionCommit, RedemptionItem,
    RedemptionTransaction, RedemptionValue,
};
pub use rule::{
    Campaign, CampaignRules, DateWindow, PointsRule, RuleAction, RuleCondition, parse_action,
    parse_conditions,
};
pub use scope::Scope;
pub use tier::{DowngradePolicy, TierConfig, TierLadder, TierReview};
