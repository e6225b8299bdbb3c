//! 会员等级服务
//!
//! 负责等级计算、等级变更与每日重新定级：
//! - 等级计算是纯函数：按 sort_order 从高到低扫描，任一门槛达标即满足
//! - 等级变更在仓储的账户锁内按最新指标重新评估，同时写入审计记录
//! - 资格年度未结束前不允许自动降级（降级保护）
//!
//! ## 重新定级流程
//!
//! 1. 查询资格年度已到期的非普通会员 -> 2. 并行逐个重新定级（允许降级），
//!    定级与资格年度顺延在同一次仓储调用中完成 -> 3. 汇总结果，单个账户失败不影响其他账户

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics as loyalty_metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{Tier, TierHistory, TierLadder, TierMetrics, TierReview};
use crate::repository::{AccountRepositoryTrait, ConfigRepositoryTrait};
use crate::service::dto::{
    DowngradePolicy, RequalificationError, RequalificationSummary, ThresholdGap, TierCriterion,
    TierProgress,
};

/// 单个账户的重新定级结果
enum SweepOutcome {
    Upgraded,
    Downgraded,
    Unchanged,
}

/// 会员等级服务
pub struct TierService {
    accounts: Arc<dyn AccountRepositoryTrait>,
    config: Arc<dyn ConfigRepositoryTrait>,
    sweep_concurrency: usize,
}

impl TierService {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        config: Arc<dyn ConfigRepositoryTrait>,
        sweep_concurrency: usize,
    ) -> Self {
        Self {
            accounts,
            config,
            sweep_concurrency: sweep_concurrency.max(1),
        }
    }

    /// 加载启用的等级配置（按 sort_order 升序）
    pub async fn load_ladder(&self) -> Result<TierLadder> {
        let configs = self.config.list_tier_configs().await?;
        Ok(TierLadder::new(configs))
    }

    /// 根据定级指标计算等级
    ///
    /// 没有任何等级配置时返回普通会员
    #[instrument(skip(self))]
    pub async fn calculate_tier(&self, metrics: &TierMetrics) -> Result<Tier> {
        let ladder = self.load_ladder().await?;
        Ok(ladder.resolve(metrics))
    }

    /// 重新计算账户等级并在需要时落库
    ///
    /// `allow_downgrade = false` 时，资格年度结束前的降级会被拦截
    #[instrument(skip(self))]
    pub async fn check_and_update_tier(
        &self,
        account_id: i64,
        allow_downgrade: bool,
    ) -> Result<Option<TierHistory>> {
        self.apply_policy(
            account_id,
            DowngradePolicy::from_allow_downgrade(allow_downgrade),
        )
        .await
    }

    /// 按指定降级策略重新定级
    ///
    /// 评估在仓储的账户锁内进行，并发入账或并发定级不会基于过期快照写入
    pub async fn apply_policy(
        &self,
        account_id: i64,
        policy: DowngradePolicy,
    ) -> Result<Option<TierHistory>> {
        let ladder = self.load_ladder().await?;
        let review = TierReview::immediate(ladder, policy, Utc::now().date_naive());
        let history = self.accounts.apply_tier_review(account_id, &review).await?;
        if let Some(history) = &history {
            record_change(history);
        }
        Ok(history)
    }

    /// 每日重新定级
    ///
    /// 处理资格年度已到期的非普通会员，允许降级，并把资格年度顺延一年
    #[instrument(skip(self))]
    pub async fn process_tier_requalification(
        &self,
        check_date: NaiveDate,
    ) -> Result<RequalificationSummary> {
        let ladder = self.load_ladder().await?;
        let accounts = self.accounts.list_due_for_requalification(check_date).await?;

        info!(
            check_date = %check_date,
            due = accounts.len(),
            "开始重新定级"
        );

        let review = &TierReview::requalification(ladder, check_date);
        let results: Vec<(i64, Result<SweepOutcome>)> = stream::iter(accounts)
            .map(|account| async move {
                let account_id = account.id;
                (account_id, self.requalify_account(review, account_id).await)
            })
            .buffer_unordered(self.sweep_concurrency)
            .collect()
            .await;

        let mut summary = RequalificationSummary::default();
        for (account_id, result) in results {
            summary.checked += 1;
            match result {
                Ok(SweepOutcome::Upgraded) => summary.upgraded += 1,
                Ok(SweepOutcome::Downgraded) => summary.downgraded += 1,
                Ok(SweepOutcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    warn!(account_id, error = %e, "账户重新定级失败，跳过");
                    summary.errors.push(RequalificationError {
                        account_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        loyalty_metrics::record_requalification_run(summary.checked, summary.errors.len());
        info!(
            checked = summary.checked,
            upgraded = summary.upgraded,
            downgraded = summary.downgraded,
            unchanged = summary.unchanged,
            errors = summary.errors.len(),
            "重新定级完成"
        );

        Ok(summary)
    }

    /// 列表中的账户只是快照，是否降级以锁内重新读取的指标为准
    async fn requalify_account(
        &self,
        review: &TierReview,
        account_id: i64,
    ) -> Result<SweepOutcome> {
        let outcome = match self.accounts.apply_tier_review(account_id, review).await? {
            Some(history) => {
                record_change(&history);
                if review.ladder.is_downgrade(history.from_tier, history.to_tier) {
                    SweepOutcome::Downgraded
                } else {
                    SweepOutcome::Upgraded
                }
            }
            None => SweepOutcome::Unchanged,
        };
        Ok(outcome)
    }

    /// 距离下一等级的进度
    #[instrument(skip(self))]
    pub async fn get_tier_progress(&self, account_id: i64) -> Result<TierProgress> {
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(account_id.to_string()))?;
        let ladder = self.load_ladder().await?;
        let metrics = account.metrics();

        let next = ladder.next_above(account.tier);
        let gaps = next
            .map(|config| {
                let mut gaps = Vec::new();
                if let Some(min) = config.min_points {
                    gaps.push(gap(TierCriterion::Points, min as f64, metrics.points as f64));
                }
                if let Some(min) = config.min_stays {
                    gaps.push(gap(TierCriterion::Stays, min as f64, metrics.stays as f64));
                }
                if let Some(min) = config.min_nights {
                    gaps.push(gap(TierCriterion::Nights, min as f64, metrics.nights as f64));
                }
                if let Some(min) = config.min_spend {
                    gaps.push(gap(TierCriterion::Spend, min, metrics.spend));
                }
                gaps
            })
            .unwrap_or_default();

        Ok(TierProgress {
            account_id,
            current_tier: account.tier,
            next_tier: next.map(|c| c.tier),
            metrics,
            gaps,
        })
    }

    /// 等级变更历史（最新在前）
    #[instrument(skip(self))]
    pub async fn get_tier_history(&self, account_id: i64) -> Result<Vec<TierHistory>> {
        self.accounts.list_tier_history(account_id).await
    }
}

fn record_change(history: &TierHistory) {
    loyalty_metrics::record_tier_change(
        history.from_tier.as_str(),
        history.to_tier.as_str(),
        history.reason.as_str(),
    );
    info!(
        account_id = history.account_id,
        from = %history.from_tier,
        to = %history.to_tier,
        reason = %history.reason,
        "会员等级已变更"
    );
}

fn gap(criterion: TierCriterion, required: f64, current: f64) -> ThresholdGap {
    ThresholdGap {
        criterion,
        required,
        current,
        remaining: (required - current).max(0.0),
    }
}
