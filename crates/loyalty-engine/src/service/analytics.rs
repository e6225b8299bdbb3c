//! 运营分析
//!
//! 只读汇总：会员分布、积分负债、时间窗口内的积分流入流出、兑换与权益使用情况。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::error::{LoyaltyError, Result};
use crate::models::{LedgerReason, PointsLedgerEntry, Tier};
use crate::repository::{
    AccountRepositoryTrait, LedgerRepositoryTrait, PerkRepositoryTrait, RedemptionRepositoryTrait,
};
use crate::service::dto::{AnalyticsReport, PerkUsage, TopEarner};

const TOP_EARNERS: usize = 10;

/// 流水的入账/扣减/退款归类
#[derive(Debug, Default, PartialEq, Eq)]
struct PointsFlow {
    awarded: i64,
    redeemed: i64,
    refunded: i64,
}

fn summarize_flow(entries: &[PointsLedgerEntry]) -> PointsFlow {
    entries.iter().fold(PointsFlow::default(), |mut flow, e| {
        match e.reason {
            LedgerReason::RedemptionRefund => flow.refunded += e.points,
            LedgerReason::Redemption => flow.redeemed += -e.points,
            _ if e.points > 0 => flow.awarded += e.points,
            _ => {}
        }
        flow
    })
}

fn top_earners(entries: &[PointsLedgerEntry], limit: usize) -> Vec<TopEarner> {
    let mut earned: HashMap<i64, i64> = HashMap::new();
    for e in entries
        .iter()
        .filter(|e| e.points > 0 && e.reason != LedgerReason::RedemptionRefund)
    {
        *earned.entry(e.account_id).or_default() += e.points;
    }

    let mut earners: Vec<TopEarner> = earned
        .into_iter()
        .map(|(account_id, points_earned)| TopEarner {
            account_id,
            points_earned,
        })
        .collect();
    earners.sort_by(|a, b| {
        b.points_earned
            .cmp(&a.points_earned)
            .then(a.account_id.cmp(&b.account_id))
    });
    earners.truncate(limit);
    earners
}

/// 运营分析服务
pub struct AnalyticsService {
    accounts: Arc<dyn AccountRepositoryTrait>,
    ledger: Arc<dyn LedgerRepositoryTrait>,
    perks: Arc<dyn PerkRepositoryTrait>,
    redemptions: Arc<dyn RedemptionRepositoryTrait>,
}

impl AnalyticsService {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        ledger: Arc<dyn LedgerRepositoryTrait>,
        perks: Arc<dyn PerkRepositoryTrait>,
        redemptions: Arc<dyn RedemptionRepositoryTrait>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            perks,
            redemptions,
        }
    }

    /// 生成时间窗口 `[from, to]` 的运营报表
    #[instrument(skip(self))]
    pub async fn get_advanced_analytics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AnalyticsReport> {
        if from > to {
            return Err(LoyaltyError::Validation(format!(
                "统计区间无效: {} > {}",
                from, to
            )));
        }

        let members_by_tier: BTreeMap<Tier, i64> = self
            .accounts
            .count_members_by_tier()
            .await?
            .into_iter()
            .collect();
        let total_members = members_by_tier.values().sum();
        let outstanding_points = self.accounts.total_outstanding_points().await?;

        let entries = self.ledger.list_entries_between(from, to).await?;
        let flow = summarize_flow(&entries);

        let mut redemptions_by_status = BTreeMap::new();
        for transaction in self.redemptions.list_between(from, to).await? {
            *redemptions_by_status
                .entry(transaction.status)
                .or_insert(0_i64) += 1;
        }

        let mut usage: BTreeMap<i64, i64> = BTreeMap::new();
        for redemption in self.perks.list_between(from, to).await? {
            *usage.entry(redemption.perk_id).or_default() += 1;
        }
        let mut perk_usage: Vec<PerkUsage> = usage
            .into_iter()
            .map(|(perk_id, redemptions)| PerkUsage {
                perk_id,
                redemptions,
            })
            .collect();
        perk_usage.sort_by(|a, b| b.redemptions.cmp(&a.redemptions));

        Ok(AnalyticsReport {
            period_start: from,
            period_end: to,
            total_members,
            members_by_tier,
            outstanding_points,
            points_awarded: flow.awarded,
            points_redeemed: flow.redeemed,
            points_refunded: flow.refunded,
            redemptions_by_status,
            perk_usage,
            top_earners: top_earners(&entries, TOP_EARNERS),
        })
    }
}
