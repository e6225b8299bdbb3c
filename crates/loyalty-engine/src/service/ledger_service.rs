//! 积分账本服务
//!
//! 入账与扣减都是账户级原子操作，由仓储层 `apply_points` 保证：
//! 锁定账户 -> 读余额 -> 计算 balance_after -> 追加流水 -> 回写余额。
//! 入账成功后同步触发一次只升不降的等级检查。

use std::sync::Arc;

use tracing::{info, instrument, warn};
use validator::Validate;

use loyalty_shared::observability::metrics as loyalty_metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{PointsLedgerEntry, PointsMutation, TierHistory};
use crate::repository::LedgerRepositoryTrait;
use crate::service::dto::{
    AwardPointsRequest, AwardPointsResult, DowngradePolicy, RedeemPointsRequest,
};
use crate::service::tier_service::TierService;

/// 积分账本服务
pub struct LedgerService {
    ledger: Arc<dyn LedgerRepositoryTrait>,
    tiers: Arc<TierService>,
}

impl LedgerService {
    pub fn new(ledger: Arc<dyn LedgerRepositoryTrait>, tiers: Arc<TierService>) -> Self {
        Self { ledger, tiers }
    }

    /// 积分入账
    ///
    /// 入账提交后检查升级；等级检查失败只记录告警，不影响已提交的入账
    #[instrument(skip(self, request), fields(account_id = request.account_id, points = request.points, reason = %request.reason))]
    pub async fn award_points(&self, request: AwardPointsRequest) -> Result<AwardPointsResult> {
        if request.points <= 0 {
            return Err(LoyaltyError::InvalidPoints(request.points));
        }
        request.validate()?;

        let mutation = PointsMutation::credit(request.account_id, request.points, request.reason)
            .with_description(request.description)
            .with_references(request.references);
        let entry = self.ledger.apply_points(mutation).await?;

        loyalty_metrics::record_points_awarded(entry.reason.as_str(), entry.points);
        info!(
            entry_id = entry.id,
            balance_after = entry.balance_after,
            "积分入账成功"
        );

        let tier_change = self.upgrade_after_award(entry.account_id).await;
        Ok(AwardPointsResult { entry, tier_change })
    }

    /// 积分扣减，余额不足时拒绝
    #[instrument(skip(self, request), fields(account_id = request.account_id, points = request.points, reason = %request.reason))]
    pub async fn redeem_points(&self, request: RedeemPointsRequest) -> Result<PointsLedgerEntry> {
        if request.points <= 0 {
            return Err(LoyaltyError::InvalidPoints(request.points));
        }
        request.validate()?;

        let mutation = PointsMutation::debit(request.account_id, request.points, request.reason)
            .with_description(request.description)
            .with_references(request.references);
        let entry = self.ledger.apply_points(mutation).await?;

        loyalty_metrics::record_points_redeemed(entry.reason.as_str(), -entry.points);
        info!(
            entry_id = entry.id,
            balance_after = entry.balance_after,
            "积分扣减成功"
        );

        Ok(entry)
    }

    /// 积分流水（最新在前）
    #[instrument(skip(self))]
    pub async fn get_points_history(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        self.ledger.list_entries(account_id, limit.clamp(1, 1000)).await
    }

    pub(crate) async fn upgrade_after_award(&self, account_id: i64) -> Option<TierHistory> {
        match self.tiers.apply_policy(account_id, DowngradePolicy::Never).await {
            Ok(change) => change,
            Err(e) => {
                warn!(account_id, error = %e, "入账后等级检查失败");
                None
            }
        }
    }
}
