//! 等级配置

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::account::{LoyaltyAccount, TierChange, TierMetrics};
use super::enums::{Tier, TierChangeReason};

/// 等级配置
///
/// 任一已配置门槛达到即视为满足（OR 语义），普通会员无门槛
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    pub tier: Tier,
    pub sort_order: i32,
    #[sqlx(default)]
    pub min_points: Option<i64>,
    #[sqlx(default)]
    pub min_stays: Option<i64>,
    #[sqlx(default)]
    pub min_nights: Option<i64>,
    #[sqlx(default)]
    pub min_spend: Option<f64>,
    /// 每 100 元消费的基础积分
    pub base_points_per_100: f64,
    pub active: bool,
}

impl TierConfig {
    /// 是否满足该等级门槛
    pub fn qualifies(&self, metrics: &TierMetrics) -> bool {
        if self.tier == Tier::Member {
            return true;
        }
        self.min_points.is_some_and(|min| metrics.points >= min)
            || self.min_stays.is_some_and(|min| metrics.stays >= min)
            || self.min_nights.is_some_and(|min| metrics.nights >= min)
            || self.min_spend.is_some_and(|min| metrics.spend >= min)
    }
}

/// 按 sort_order 升序排列的启用等级列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierLadder {
    configs: Vec<TierConfig>,
}

impl TierLadder {
    /// 过滤未启用的配置并按 sort_order 升序排序
    pub fn new(configs: impl IntoIterator<Item = TierConfig>) -> Self {
        let mut configs: Vec<TierConfig> = configs.into_iter().filter(|c| c.active).collect();
        configs.sort_by_key(|c| c.sort_order);
        Self { configs }
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn configs(&self) -> &[TierConfig] {
        &self.configs
    }

    pub fn get(&self, tier: Tier) -> Option<&TierConfig> {
        self.configs.iter().find(|c| c.tier == tier)
    }

    /// 等级在列表中的位置；未配置的等级退回到枚举顺序
    pub fn index_of(&self, tier: Tier) -> usize {
        self.configs
            .iter()
            .position(|c| c.tier == tier)
            .unwrap_or_else(|| {
                self.configs
                    .iter()
                    .filter(|c| c.tier < tier)
                    .count()
            })
    }

    /// `to` 是否低于 `from`
    pub fn is_downgrade(&self, from: Tier, to: Tier) -> bool {
        self.index_of(to) < self.index_of(from)
    }

    /// 从最高等级向下扫描，返回第一个满足门槛的等级；无配置时为普通会员
    pub fn resolve(&self, metrics: &TierMetrics) -> Tier {
        self.configs
            .iter()
            .rev()
            .find(|c| c.qualifies(metrics))
            .map(|c| c.tier)
            .unwrap_or(Tier::Member)
    }

    /// 紧邻的更高等级
    pub fn next_above(&self, tier: Tier) -> Option<&TierConfig> {
        let idx = self.configs.iter().position(|c| c.tier == tier)?;
        self.configs.get(idx + 1)
    }

    /// 根据降级策略判断账户是否需要变更等级
    ///
    /// 返回 `None` 表示等级不变或降级被拦截
    pub fn evaluate_change(
        &self,
        account: &LoyaltyAccount,
        policy: DowngradePolicy,
        today: NaiveDate,
    ) -> Option<TierChange> {
        let metrics = account.metrics();
        let resolved = self.resolve(&metrics);
        if resolved == account.tier {
            return None;
        }

        let is_downgrade = self.is_downgrade(account.tier, resolved);
        if is_downgrade {
            let allowed = match policy {
                DowngradePolicy::Never => false,
                DowngradePolicy::AfterQualificationYear => account.qualification_year_ended(today),
                DowngradePolicy::Always => true,
            };
            if !allowed {
                return None;
            }
        }

        Some(TierChange {
            account_id: account.id,
            from_tier: account.tier,
            to_tier: resolved,
            metrics,
            reason: if is_downgrade {
                TierChangeReason::ReQualification
            } else {
                TierChangeReason::AutoUpgrade
            },
        })
    }
}

/// 降级策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowngradePolicy {
    /// 只升不降（入账触发）
    Never,
    /// 资格年度结束后才允许降级
    AfterQualificationYear,
    /// 允许降级（重新定级）
    Always,
}

impl DowngradePolicy {
    pub fn from_allow_downgrade(allow_downgrade: bool) -> Self {
        if allow_downgrade {
            Self::Always
        } else {
            Self::AfterQualificationYear
        }
    }
}

/// 在账户锁内执行的一次定级
///
/// 仓储锁定账户后用最新指标调用 [`TierLadder::evaluate_change`]，
/// 等级、审计记录与资格年度在同一原子操作中写入
#[derive(Debug, Clone)]
pub struct TierReview {
    pub ladder: TierLadder,
    pub policy: DowngradePolicy,
    pub today: NaiveDate,
    /// 重新定级批处理：账户须仍处于到期状态，处理后资格年度顺延一年
    pub advance_year: bool,
}

impl TierReview {
    /// 单账户即时定级，不推进资格年度
    pub fn immediate(ladder: TierLadder, policy: DowngradePolicy, today: NaiveDate) -> Self {
        Self {
            ladder,
            policy,
            today,
            advance_year: false,
        }
    }

    /// 资格年度到期后的重新定级，允许降级
    pub fn requalification(ladder: TierLadder, check_date: NaiveDate) -> Self {
        Self {
            ladder,
            policy: DowngradePolicy::Always,
            today: check_date,
            advance_year: true,
        }
    }

    /// 锁内是否仍需处理；批处理下已被顺延的账户跳过
    pub fn applies_to(&self, account: &LoyaltyAccount) -> bool {
        !self.advance_year || account.requalification_due(self.today)
    }
}

#[cfg(test)]
pub(crate) fn tier_config(tier: Tier, sort_order: i32) -> TierConfig {
    TierConfig {
        tier,
        sort_order,
        min_points: None,
        min_stays: None,
        min_nights: None,
        min_spend: None,
        base_points_per_100: 10.0,
        active: true,
    }
}
