//! 酒店会员积分引擎
//!
//! 负责会员积分的计算、入账、等级评定、权益与兑换。
//!
//! ## 核心功能
//!
//! - **积分计算**：按等级基础倍率、积分规则与营销活动计算单笔预订的积分
//! - **积分账本**：所有余额变动写入只追加的流水，支持审计追溯
//! - **等级评定**：入账后自动升级，资格年度到期后重新定级
//! - **会员权益**：条件匹配、容量限制与权益核销
//! - **积分兑换**：动态定价、库存扣减、状态流转与取消退款
//! - **风控与分析**：只读的风险评分与运营报表
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `service`: 业务服务层
//! - `engine`: 服务装配
//! - `worker`: 定时任务
//! - `settings`: 引擎运行参数

pub mod engine;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;
pub mod settings;
pub mod worker;

pub use engine::{LoyaltyEngine, Repositories};
pub use error::{LoyaltyError, Result};
pub use models::*;
pub use repository::MemoryLoyaltyStore;
pub use service::{
    AnalyticsService, BookingRewardService, FraudDetector, LedgerService, PerkService,
    PointsCalculator, RedemptionService, TierService, dto,
};
pub use settings::EngineSettings;
pub use worker::RequalificationWorker;
