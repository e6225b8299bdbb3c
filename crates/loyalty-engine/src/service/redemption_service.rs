//! 积分兑换服务
//!
//! 处理积分兑换商品的完整流程：
//! - 动态定价（按列表顺序逐条叠加，最后取整一次）
//! - 兑换资格校验（预期内的失败以结构化结果返回）
//! - 兑换提交：扣积分、记流水、减库存、建交易在同一原子操作中完成
//! - 交易状态只能前进，取消时退回积分并恢复库存
//!
//! ## 兑换流程
//!
//! 1. 资格校验 -> 2. 动态定价 -> 3. 原子提交 -> 4. 记录指标

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics as loyalty_metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{
    PricingAdjustment, PricingRule, RedemptionCommit, RedemptionItem, RedemptionStatus,
    RedemptionTransaction,
};
use crate::repository::{AccountRepositoryTrait, ConfigRepositoryTrait, RedemptionRepositoryTrait};
use crate::service::dto::{
    CatalogEntry, ExpirySummary, ProcessRedemptionRequest, RedemptionCancellation,
    RedemptionContext, RedemptionReceipt, RedemptionValidation,
};

fn pricing_rule_matches(rule: &PricingRule, ctx: &RedemptionContext) -> bool {
    rule.room_type_id.is_none_or(|id| ctx.room_type_id == Some(id))
        && rule.property_id.is_none_or(|id| ctx.property_id == Some(id))
        && rule.season.is_none_or(|season| season.contains(ctx.at))
}

/// 计算兑换所需积分
///
/// 动态定价规则按列表顺序逐条匹配，命中的规则依次生效（不择优）
pub fn calculate_redemption_points(item: &RedemptionItem, ctx: &RedemptionContext) -> i64 {
    let pricing = &item.dynamic_pricing;
    if !pricing.dynamic {
        return item.base_points_required;
    }

    let mut points = item.base_points_required as f64;
    for rule in pricing.rules.iter().filter(|r| pricing_rule_matches(r, ctx)) {
        match rule.adjustment {
            PricingAdjustment::SetPoints { points: set } => points = set as f64,
            PricingAdjustment::Multiply { multiplier } => points *= multiplier,
        }
    }
    points.round().max(0.0) as i64
}

/// 积分兑换服务
pub struct RedemptionService {
    accounts: Arc<dyn AccountRepositoryTrait>,
    config: Arc<dyn ConfigRepositoryTrait>,
    redemptions: Arc<dyn RedemptionRepositoryTrait>,
}

impl RedemptionService {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        config: Arc<dyn ConfigRepositoryTrait>,
        redemptions: Arc<dyn RedemptionRepositoryTrait>,
    ) -> Self {
        Self {
            accounts,
            config,
            redemptions,
        }
    }

    /// 兑换资格校验
    ///
    /// 商品不可用、范围不符、库存或积分不足都以 `valid = false` 返回；
    /// 账户不存在属于调用方错误，直接报错
    #[instrument(skip(self, context))]
    pub async fn validate_redemption(
        &self,
        loyalty_account_id: i64,
        item_id: i64,
        context: &RedemptionContext,
    ) -> Result<RedemptionValidation> {
        let (validation, _) = self.evaluate(loyalty_account_id, item_id, context).await?;
        Ok(validation)
    }

    async fn evaluate(
        &self,
        loyalty_account_id: i64,
        item_id: i64,
        ctx: &RedemptionContext,
    ) -> Result<(RedemptionValidation, Option<RedemptionItem>)> {
        let account = self
            .accounts
            .get_account(loyalty_account_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(loyalty_account_id.to_string()))?;

        let item = match self.config.get_redemption_item(item_id).await? {
            Some(item) if item.active => item,
            _ => return Ok((RedemptionValidation::rejected("Item not available"), None)),
        };

        let rejection = if !item.window.contains(ctx.at) {
            Some("Item not available at this time")
        } else if !item.tier_ids.contains(&account.tier) {
            Some("Tier not eligible")
        } else if !item.property_ids.admits(ctx.property_id.as_ref()) {
            Some("Property not eligible")
        } else if !item.room_type_ids.admits(ctx.room_type_id.as_ref()) {
            Some("Room type not eligible")
        } else if !item.in_stock() {
            Some("Out of stock")
        } else {
            None
        };
        if let Some(reason) = rejection {
            return Ok((RedemptionValidation::rejected(reason), Some(item)));
        }

        let points_required = calculate_redemption_points(&item, ctx);
        let validation = if account.points < points_required {
            RedemptionValidation {
                valid: false,
                reason: Some("Insufficient points".to_string()),
                points_required: Some(points_required),
                points_available: Some(account.points),
            }
        } else {
            RedemptionValidation::ok(points_required, account.points)
        };
        Ok((validation, Some(item)))
    }

    /// 兑换商品
    ///
    /// 校验通过后原子提交；提交时仓储会再次校验余额与库存
    #[instrument(skip(self, request), fields(account_id = request.loyalty_account_id, item_id = request.item_id))]
    pub async fn process_redemption(
        &self,
        request: ProcessRedemptionRequest,
    ) -> Result<RedemptionReceipt> {
        let started = Instant::now();
        let (validation, item) = self
            .evaluate(request.loyalty_account_id, request.item_id, &request.context)
            .await?;

        let (item, points) = match (validation, item) {
            (
                RedemptionValidation {
                    valid: true,
                    points_required: Some(points),
                    ..
                },
                Some(item),
            ) => (item, points),
            (validation, _) => {
                let reason = validation
                    .reason
                    .unwrap_or_else(|| "Redemption not allowed".to_string());
                warn!(reason = %reason, "兑换资格校验未通过");
                loyalty_metrics::record_redemption(
                    request.item_id,
                    "REJECTED",
                    started.elapsed().as_secs_f64(),
                );
                return Err(LoyaltyError::RedemptionRejected(reason));
            }
        };

        let now = Utc::now();
        let commit = RedemptionCommit {
            item_id: item.id,
            loyalty_account_id: request.loyalty_account_id,
            points,
            booking_id: request.context.booking_id,
            expires_at: item.value.expires_at(now),
            description: Some(format!("兑换 {}", item.name)),
        };

        let (transaction, ledger_entry) = match self.redemptions.commit(commit).await {
            Ok(result) => result,
            Err(e) => {
                loyalty_metrics::record_redemption(
                    item.id,
                    "FAILED",
                    started.elapsed().as_secs_f64(),
                );
                return Err(e);
            }
        };

        loyalty_metrics::record_points_redeemed(ledger_entry.reason.as_str(), points);
        loyalty_metrics::record_redemption(
            item.id,
            transaction.status.as_str(),
            started.elapsed().as_secs_f64(),
        );
        info!(
            transaction_id = transaction.id,
            points,
            balance_after = ledger_entry.balance_after,
            "积分兑换成功"
        );

        Ok(RedemptionReceipt {
            transaction,
            ledger_entry,
        })
    }

    async fn require_transaction(&self, transaction_id: i64) -> Result<RedemptionTransaction> {
        self.redemptions
            .get_transaction(transaction_id)
            .await?
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))
    }

    /// 更新兑换状态
    ///
    /// 状态只能前进；重复提交当前状态视为幂等，USED 保留首次核销时间。
    /// 变更为 CANCELLED 时走取消退款流程
    #[instrument(skip(self))]
    pub async fn update_redemption_status(
        &self,
        transaction_id: i64,
        status: RedemptionStatus,
    ) -> Result<RedemptionTransaction> {
        let current = self.require_transaction(transaction_id).await?;
        if current.status == status {
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(LoyaltyError::InvalidStatusTransition {
                from: current.status,
                to: status,
            });
        }

        if status == RedemptionStatus::Cancelled {
            return self
                .cancel_redemption(transaction_id)
                .await
                .map(|c| c.transaction);
        }

        let used_at = (status == RedemptionStatus::Used).then(Utc::now);
        let updated = self
            .redemptions
            .update_status(transaction_id, current.status, status, used_at)
            .await?;

        info!(
            transaction_id,
            from = %current.status,
            to = %updated.status,
            "兑换状态已更新"
        );
        Ok(updated)
    }

    /// 取消兑换：退回积分并恢复库存
    ///
    /// 已取消的交易重复取消时不再退款
    #[instrument(skip(self))]
    pub async fn cancel_redemption(&self, transaction_id: i64) -> Result<RedemptionCancellation> {
        let current = self.require_transaction(transaction_id).await?;
        if current.status == RedemptionStatus::Cancelled {
            return Ok(RedemptionCancellation {
                transaction: current,
                refund: None,
            });
        }
        if !current.status.can_transition_to(RedemptionStatus::Cancelled) {
            return Err(LoyaltyError::InvalidStatusTransition {
                from: current.status,
                to: RedemptionStatus::Cancelled,
            });
        }

        let (transaction, refund) = self
            .redemptions
            .cancel_with_refund(transaction_id, current.status)
            .await?;

        loyalty_metrics::record_points_awarded(refund.reason.as_str(), refund.points);
        info!(
            transaction_id,
            refunded = refund.points,
            balance_after = refund.balance_after,
            "兑换已取消并退回积分"
        );

        Ok(RedemptionCancellation {
            transaction,
            refund: Some(refund),
        })
    }

    /// 过期处理：已到期的 PENDING/CONFIRMED 交易置为 EXPIRED
    #[instrument(skip(self))]
    pub async fn expire_redemptions(&self, now: DateTime<Utc>) -> Result<ExpirySummary> {
        let expirable = self.redemptions.list_expirable(now).await?;
        let mut summary = ExpirySummary {
            checked: expirable.len(),
            ..Default::default()
        };

        for transaction in expirable {
            match self
                .redemptions
                .update_status(
                    transaction.id,
                    transaction.status,
                    RedemptionStatus::Expired,
                    None,
                )
                .await
            {
                Ok(_) => summary.expired += 1,
                Err(e) => {
                    warn!(transaction_id = transaction.id, error = %e, "兑换过期处理失败");
                    summary.errors.push((transaction.id, e.to_string()));
                }
            }
        }

        info!(
            checked = summary.checked,
            expired = summary.expired,
            errors = summary.errors.len(),
            "兑换过期处理完成"
        );
        Ok(summary)
    }

    /// 会员的兑换记录
    #[instrument(skip(self))]
    pub async fn list_redemptions(&self, account_id: i64) -> Result<Vec<RedemptionTransaction>> {
        self.redemptions.list_by_account(account_id).await
    }

    /// 兑换目录
    ///
    /// 仅列出当前有效且等级适用的商品；上下文未给出物业或房型时不按其过滤
    #[instrument(skip(self, context))]
    pub async fn get_redemption_catalog(
        &self,
        account_id: i64,
        context: &RedemptionContext,
    ) -> Result<Vec<CatalogEntry>> {
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(account_id.to_string()))?;

        let items = self.config.list_active_redemption_items().await?;
        let catalog = items
            .into_iter()
            .filter(|item| {
                item.window.contains(context.at)
                    && item.tier_ids.contains(&account.tier)
                    && context
                        .property_id
                        .is_none_or(|id| item.property_ids.contains(&id))
                    && context
                        .room_type_id
                        .is_none_or(|id| item.room_type_ids.contains(&id))
            })
            .map(|item| {
                let points_required = calculate_redemption_points(&item, context);
                CatalogEntry {
                    affordable: account.points >= points_required,
                    in_stock: item.in_stock(),
                    points_required,
                    item,
                }
            })
            .collect();

        Ok(catalog)
    }
}
