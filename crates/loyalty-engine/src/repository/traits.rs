//! 仓储 Trait 定义
//!
//! 服务层只依赖这些接口。涉及余额、容量、库存的读改写序列
//! 都收敛为单个仓储调用，由实现方保证原子性（行锁或进程内锁）。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{
    BookingSnapshot, Campaign, LedgerReason, LoyaltyAccount, NewPerkRedemption, Perk, PerkLimits,
    PerkRedemption, PointsLedgerEntry, PointsMutation, PointsRule, RedemptionCommit,
    RedemptionItem, RedemptionStatus, RedemptionTransaction, Tier, TierConfig, TierHistory,
    TierReview,
};

/// 会员账户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepositoryTrait: Send + Sync {
    async fn get_account(&self, account_id: i64) -> Result<Option<LoyaltyAccount>>;
    async fn get_account_by_user(&self, user_id: &str) -> Result<Option<LoyaltyAccount>>;

    /// 幂等开户：已存在则直接返回
    async fn get_or_create_account(&self, user_id: &str, today: NaiveDate)
    -> Result<LoyaltyAccount>;

    /// 按等级统计会员数（仅包含有会员的等级）
    async fn count_members_by_tier(&self) -> Result<Vec<(Tier, i64)>>;

    /// 全部账户的未使用积分总额
    async fn total_outstanding_points(&self) -> Result<i64>;

    /// 资格年度已到期（end <= check_date）的非普通会员账户
    async fn list_due_for_requalification(
        &self,
        check_date: NaiveDate,
    ) -> Result<Vec<LoyaltyAccount>>;

    /// 在账户锁内定级
    ///
    /// 锁定账户 -> 用最新指标评估 -> 写等级与审计记录，
    /// `review.advance_year` 时同一原子操作内顺延资格年度。
    /// 返回 `None` 表示等级未变；批处理下资格年度已被顺延的账户不做修改
    async fn apply_tier_review(
        &self,
        account_id: i64,
        review: &TierReview,
    ) -> Result<Option<TierHistory>>;

    async fn list_tier_history(&self, account_id: i64) -> Result<Vec<TierHistory>>;
}

/// 积分账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    /// 原子执行一次积分变动
    ///
    /// 锁定账户 -> 读余额 -> 拒绝透支 -> 追加流水 -> 回写余额（及住宿指标）
    async fn apply_points(&self, mutation: PointsMutation) -> Result<PointsLedgerEntry>;

    /// 最近的流水，按时间倒序
    async fn list_entries(&self, account_id: i64, limit: i64) -> Result<Vec<PointsLedgerEntry>>;

    async fn list_entries_since(
        &self,
        account_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<PointsLedgerEntry>>;

    async fn list_entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PointsLedgerEntry>>;

    async fn find_booking_entry(
        &self,
        booking_id: i64,
        reason: LedgerReason,
    ) -> Result<Option<PointsLedgerEntry>>;
}

/// 配置仓储接口（等级、规则、活动、权益、兑换商品）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigRepositoryTrait: Send + Sync {
    async fn list_tier_configs(&self) -> Result<Vec<TierConfig>>;

    /// 启用且时间窗口包含 `at` 的规则，按 priority 降序
    async fn list_active_points_rules(&self, at: DateTime<Utc>) -> Result<Vec<PointsRule>>;

    /// 启用且时间窗口包含 `at` 的活动
    async fn list_active_campaigns(&self, at: DateTime<Utc>) -> Result<Vec<Campaign>>;

    async fn get_perk(&self, perk_id: i64) -> Result<Option<Perk>>;
    async fn list_active_perks(&self) -> Result<Vec<Perk>>;

    async fn get_redemption_item(&self, item_id: i64) -> Result<Option<RedemptionItem>>;
    async fn list_active_redemption_items(&self) -> Result<Vec<RedemptionItem>>;
}

/// 权益领取仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PerkRepositoryTrait: Send + Sync {
    /// 会员已占用额度（ACTIVE/USED）
    async fn count_member_usage(&self, perk_id: i64, account_id: i64) -> Result<i64>;

    /// 单次入住已占用额度（ACTIVE/USED）
    async fn count_stay_usage(&self, perk_id: i64, booking_id: i64) -> Result<i64>;

    /// 原子领取：校验三类容量 -> 写领取记录 -> current_usage + 1
    ///
    /// 任一容量不足返回 `CapacityExceeded`
    async fn reserve(
        &self,
        redemption: NewPerkRedemption,
        limits: PerkLimits,
    ) -> Result<PerkRedemption>;

    async fn list_by_account(&self, account_id: i64) -> Result<Vec<PerkRedemption>>;

    async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PerkRedemption>>;
}

/// 兑换交易仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedemptionRepositoryTrait: Send + Sync {
    /// 原子提交兑换：扣积分并记流水、减库存、创建 PENDING 交易
    ///
    /// 余额不足返回 `InsufficientPoints`，库存不足返回 `OutOfStock`，均不留下部分写入
    async fn commit(
        &self,
        commit: RedemptionCommit,
    ) -> Result<(RedemptionTransaction, PointsLedgerEntry)>;

    async fn get_transaction(&self, transaction_id: i64) -> Result<Option<RedemptionTransaction>>;

    /// 条件更新状态：当前状态必须仍为 `expected`，否则返回 `ConcurrencyConflict`
    async fn update_status(
        &self,
        transaction_id: i64,
        expected: RedemptionStatus,
        next: RedemptionStatus,
        used_at: Option<DateTime<Utc>>,
    ) -> Result<RedemptionTransaction>;

    /// 原子取消：状态置为 CANCELLED、退回积分、恢复库存
    async fn cancel_with_refund(
        &self,
        transaction_id: i64,
        expected: RedemptionStatus,
    ) -> Result<(RedemptionTransaction, PointsLedgerEntry)>;

    async fn list_by_account(&self, account_id: i64) -> Result<Vec<RedemptionTransaction>>;

    /// 已过期但仍为 PENDING/CONFIRMED 的交易
    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<RedemptionTransaction>>;

    async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RedemptionTransaction>>;
}

/// 外部预订系统只读视图
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookingDirectoryTrait: Send + Sync {
    async fn get_booking(&self, booking_id: i64) -> Result<Option<BookingSnapshot>>;

    async fn count_user_bookings_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<i64>;
}
