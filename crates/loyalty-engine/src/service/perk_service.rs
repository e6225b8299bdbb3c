//! 会员权益服务
//!
//! 权益领取分两步：
//! - 资格判断（纯函数）：最低等级、等级/物业范围、渠道、入住晚数、有效期
//! - 容量占用（仓储原子操作）：全局总量、每会员次数、每次入住次数
//!
//! 预订自动发放时尽力而为，单个权益失败记录后跳过。

use std::sync::Arc;

use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics as loyalty_metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{
    BookingSnapshot, LoyaltyAccount, NewPerkRedemption, Perk, PerkLimits, PerkRedemption,
    TierLadder,
};
use crate::repository::{AccountRepositoryTrait, ConfigRepositoryTrait, PerkRepositoryTrait};
use crate::service::dto::{
    CapacityCheck, PerkApplication, PerkContext, RedeemPerkRequest, SkippedPerk,
};

/// 权益资格判断
///
/// 受限条件在上下文缺少对应值时视为不满足
pub fn evaluate_perk_conditions(ladder: &TierLadder, perk: &Perk, ctx: &PerkContext) -> bool {
    let conditions = &perk.conditions;

    if !perk.active || !conditions.window.contains(ctx.at) {
        return false;
    }
    if let Some(min_tier) = conditions.min_tier {
        if ladder.index_of(ctx.member_tier) < ladder.index_of(min_tier) {
            return false;
        }
    }
    if !perk.tier_ids.contains(&ctx.member_tier) || !perk.property_ids.admits(ctx.property_id.as_ref())
    {
        return false;
    }
    if let Some(source) = conditions.booking_source {
        if ctx.booking_source != Some(source) {
            return false;
        }
    }
    if conditions.min_stay_length.is_some() || conditions.max_stay_length.is_some() {
        let Some(stay) = ctx.stay_length else {
            return false;
        };
        if conditions.min_stay_length.is_some_and(|min| stay < min)
            || conditions.max_stay_length.is_some_and(|max| stay > max)
        {
            return false;
        }
    }
    true
}

/// 会员权益服务
pub struct PerkService {
    accounts: Arc<dyn AccountRepositoryTrait>,
    config: Arc<dyn ConfigRepositoryTrait>,
    perks: Arc<dyn PerkRepositoryTrait>,
}

impl PerkService {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        config: Arc<dyn ConfigRepositoryTrait>,
        perks: Arc<dyn PerkRepositoryTrait>,
    ) -> Self {
        Self {
            accounts,
            config,
            perks,
        }
    }

    async fn load_ladder(&self) -> Result<TierLadder> {
        Ok(TierLadder::new(self.config.list_tier_configs().await?))
    }

    async fn require_account(&self, account_id: i64) -> Result<LoyaltyAccount> {
        self.accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(account_id.to_string()))
    }

    async fn require_perk(&self, perk_id: i64) -> Result<Perk> {
        self.config
            .get_perk(perk_id)
            .await?
            .ok_or(LoyaltyError::PerkNotFound(perk_id))
    }

    /// 容量检查（只读）
    ///
    /// 容量不足以结构化结果返回，实际占用时由仓储再次原子校验
    #[instrument(skip(self))]
    pub async fn check_perk_capacity(
        &self,
        perk_id: i64,
        loyalty_account_id: i64,
        booking_id: Option<i64>,
    ) -> Result<CapacityCheck> {
        let perk = self.require_perk(perk_id).await?;
        self.capacity_of(&perk, loyalty_account_id, booking_id).await
    }

    async fn capacity_of(
        &self,
        perk: &Perk,
        loyalty_account_id: i64,
        booking_id: Option<i64>,
    ) -> Result<CapacityCheck> {
        if perk
            .total_capacity
            .is_some_and(|cap| perk.current_usage >= cap)
        {
            return Ok(CapacityCheck::unavailable("Perk capacity reached"));
        }

        if let Some(max) = perk.max_usage_per_member {
            let used = self
                .perks
                .count_member_usage(perk.id, loyalty_account_id)
                .await?;
            if used >= max {
                return Ok(CapacityCheck::unavailable("Member limit reached"));
            }
        }

        if let (Some(max), Some(booking_id)) = (perk.max_usage_per_stay, booking_id) {
            let used = self.perks.count_stay_usage(perk.id, booking_id).await?;
            if used >= max {
                return Ok(CapacityCheck::unavailable("Stay limit reached"));
            }
        }

        Ok(CapacityCheck::available())
    }

    /// 当前可领取的权益：满足资格且仍有容量
    #[instrument(skip(self, context))]
    pub async fn get_eligible_perks(
        &self,
        account_id: i64,
        booking_id: Option<i64>,
        context: &PerkContext,
    ) -> Result<Vec<Perk>> {
        let account = self.require_account(account_id).await?;
        let ladder = self.load_ladder().await?;
        let ctx = PerkContext {
            member_tier: account.tier,
            ..context.clone()
        };

        let mut eligible = Vec::new();
        for perk in self.config.list_active_perks().await? {
            if !evaluate_perk_conditions(&ladder, &perk, &ctx) {
                continue;
            }
            if self.capacity_of(&perk, account_id, booking_id).await?.available {
                eligible.push(perk);
            }
        }
        Ok(eligible)
    }

    /// 领取权益
    ///
    /// 容量校验、写领取记录、计数递增由仓储在同一原子操作中完成
    #[instrument(skip(self))]
    pub async fn redeem_perk(&self, request: RedeemPerkRequest) -> Result<PerkRedemption> {
        let perk = self.require_perk(request.perk_id).await?;
        self.require_account(request.loyalty_account_id).await?;
        if !perk.active {
            return Err(LoyaltyError::Validation(format!("权益未启用: {}", perk.id)));
        }

        let new_redemption = NewPerkRedemption {
            perk_id: perk.id,
            loyalty_account_id: request.loyalty_account_id,
            booking_id: request.booking_id,
            value_applied: perk.value.amount.unwrap_or(0.0),
        };

        match self
            .perks
            .reserve(new_redemption, PerkLimits::from(&perk))
            .await
        {
            Ok(redemption) => {
                loyalty_metrics::record_perk_redemption(perk.id, redemption.status.as_str());
                info!(
                    perk_id = perk.id,
                    redemption_id = redemption.id,
                    account_id = request.loyalty_account_id,
                    "权益领取成功"
                );
                Ok(redemption)
            }
            Err(e) => {
                loyalty_metrics::record_perk_redemption(perk.id, "REJECTED");
                Err(e)
            }
        }
    }

    /// 为预订自动发放全部可领取的权益
    #[instrument(skip(self, booking), fields(booking_id = booking.booking_id))]
    pub async fn apply_perks_to_booking(&self, booking: &BookingSnapshot) -> Result<PerkApplication> {
        let account = self
            .accounts
            .get_account_by_user(&booking.user_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(booking.user_id.clone()))?;
        let context = PerkContext::for_booking(booking, account.tier);

        let eligible = self
            .get_eligible_perks(account.id, Some(booking.booking_id), &context)
            .await?;

        let mut application = PerkApplication::default();
        for perk in eligible {
            let request = RedeemPerkRequest {
                perk_id: perk.id,
                loyalty_account_id: account.id,
                booking_id: Some(booking.booking_id),
            };
            match self.redeem_perk(request).await {
                Ok(redemption) => application.applied.push(redemption),
                Err(e) => {
                    warn!(perk_id = perk.id, error = %e, "自动发放权益失败，跳过");
                    application.skipped.push(SkippedPerk {
                        perk_id: perk.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            applied = application.applied.len(),
            skipped = application.skipped.len(),
            "预订权益发放完成"
        );
        Ok(application)
    }
}
