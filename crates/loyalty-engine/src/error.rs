//! 积分引擎错误类型
//!
//! 定义服务层的业务错误和系统错误。
//! 用户可预期的失败（兑换资格、权益容量）以结构化结果返回，不走错误通道。

use thiserror::Error;

use crate::models::{RedemptionStatus, Tier};

/// 积分引擎错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 记录不存在 ===
    #[error("会员账户不存在: {0}")]
    AccountNotFound(String),

    #[error("等级配置不存在: {0}")]
    TierConfigNotFound(Tier),

    #[error("兑换商品不存在: {0}")]
    ItemNotFound(i64),

    #[error("权益不存在: {0}")]
    PerkNotFound(i64),

    #[error("预订不存在: {0}")]
    BookingNotFound(i64),

    #[error("兑换记录不存在: {0}")]
    TransactionNotFound(i64),

    // === 参数错误 ===
    #[error("积分数量必须为正数: {0}")]
    InvalidPoints(i64),

    #[error("规则配置无效: {0}")]
    InvalidRule(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 状态错误 ===
    #[error("Insufficient points: 需要 {required}, 可用 {available}")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("容量不足: {reason}")]
    CapacityExceeded { reason: String },

    #[error("兑换商品库存不足: item_id={0}")]
    OutOfStock(i64),

    #[error("兑换状态不允许此变更: {from} -> {to}")]
    InvalidStatusTransition {
        from: RedemptionStatus,
        to: RedemptionStatus,
    },

    #[error("预订积分已发放: booking_id={0}")]
    DuplicateAward(i64),

    #[error("兑换资格校验未通过: {0}")]
    RedemptionRejected(String),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl From<validator::ValidationErrors> for LoyaltyError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl LoyaltyError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::ConcurrencyConflict)
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) | Self::ConcurrencyConflict
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::TierConfigNotFound(_) => "TIER_CONFIG_NOT_FOUND",
            Self::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Self::PerkNotFound(_) => "PERK_NOT_FOUND",
            Self::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::InvalidPoints(_) => "INVALID_POINTS",
            Self::InvalidRule(_) => "INVALID_RULE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::OutOfStock(_) => "OUT_OF_STOCK",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::DuplicateAward(_) => "DUPLICATE_AWARD",
            Self::RedemptionRejected(_) => "REDEMPTION_REJECTED",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
