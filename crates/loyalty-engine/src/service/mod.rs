//! 服务层
//!
//! 实现积分引擎业务逻辑，只依赖仓储 trait，不感知存储实现。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `tier_service`: 等级计算、等级变更与每日重新定级
//! - `points_calculator`: 预订积分计算（规则与活动叠加）
//! - `ledger_service`: 积分入账与扣减
//! - `booking_rewards`: 预订完成入账
//! - `perk_service`: 会员权益资格、容量与领取
//! - `redemption_service`: 积分兑换商品定价、校验与交易生命周期
//! - `fraud`: 积分风控评分
//! - `analytics`: 运营分析报表

pub mod analytics;
pub mod booking_rewards;
pub mod dto;
pub mod fraud;
pub mod ledger_service;
pub mod perk_service;
pub mod points_calculator;
pub mod redemption_service;
pub mod tier_service;

pub use analytics::AnalyticsService;
pub use booking_rewards::BookingRewardService;
pub use dto::*;
pub use fraud::FraudDetector;
pub use ledger_service::LedgerService;
pub use perk_service::{PerkService, evaluate_perk_conditions};
pub use points_calculator::{PointsCalculator, RuleContext, apply_adjustments};
pub use redemption_service::{RedemptionService, calculate_redemption_points};
pub use tier_service::TierService;
