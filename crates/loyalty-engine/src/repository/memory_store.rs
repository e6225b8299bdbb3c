//! 内存存储
//!
//! 基于 DashMap 的进程内实现，适用于测试和本地运行。
//!
//! 原子性通过持有账户条目的写锁实现：同一账户的积分变动串行执行，
//! 不同账户互不阻塞。加锁顺序固定为 账户 -> 商品/权益 -> 流水/交易，避免死锁。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use super::traits::{
    AccountRepositoryTrait, BookingDirectoryTrait, ConfigRepositoryTrait, LedgerRepositoryTrait,
    PerkRepositoryTrait, RedemptionRepositoryTrait,
};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    BookingSnapshot, Campaign, LedgerReason, LedgerReferences, LoyaltyAccount, NewPerkRedemption,
    Perk, PerkLimits, PerkRedemption, PerkRedemptionStatus, PointsLedgerEntry, PointsMutation,
    PointsRule, RedemptionCommit, RedemptionItem, RedemptionStatus, RedemptionTransaction,
    Tier, TierConfig, TierHistory, TierReview,
};

/// 内存版积分存储，实现全部仓储接口
#[derive(Debug, Default)]
pub struct MemoryLoyaltyStore {
    next_id: AtomicI64,
    accounts: DashMap<i64, LoyaltyAccount>,
    user_index: DashMap<String, i64>,
    ledger: DashMap<i64, Vec<PointsLedgerEntry>>,
    /// (booking_id, reason) -> 流水 ID，保证预订入账至多一次
    award_index: DashMap<(i64, LedgerReason), i64>,
    tier_history: DashMap<i64, Vec<TierHistory>>,
    tier_configs: RwLock<Vec<TierConfig>>,
    rules: RwLock<Vec<PointsRule>>,
    campaigns: RwLock<Vec<Campaign>>,
    perks: DashMap<i64, Perk>,
    /// 按权益 ID 分组的领取记录
    perk_redemptions: DashMap<i64, Vec<PerkRedemption>>,
    items: DashMap<i64, RedemptionItem>,
    transactions: DashMap<i64, RedemptionTransaction>,
    bookings: DashMap<i64, BookingSnapshot>,
}

impl MemoryLoyaltyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ==================== 数据准备 ====================

    pub fn insert_tier_config(&self, config: TierConfig) {
        let mut configs = self.tier_configs.write();
        configs.retain(|c| c.tier != config.tier);
        configs.push(config);
    }

    pub fn insert_points_rule(&self, rule: PointsRule) {
        let mut rules = self.rules.write();
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        let mut campaigns = self.campaigns.write();
        campaigns.retain(|c| c.id != campaign.id);
        campaigns.push(campaign);
    }

    pub fn insert_perk(&self, perk: Perk) {
        self.perks.insert(perk.id, perk);
    }

    pub fn insert_redemption_item(&self, item: RedemptionItem) {
        self.items.insert(item.id, item);
    }

    pub fn insert_booking(&self, booking: BookingSnapshot) {
        self.bookings.insert(booking.booking_id, booking);
    }

    /// 直接写入账户（仅用于构造测试数据，不产生流水）
    pub fn insert_account(&self, account: LoyaltyAccount) {
        self.next_id.fetch_max(account.id, Ordering::SeqCst);
        self.user_index.insert(account.user_id.clone(), account.id);
        self.accounts.insert(account.id, account);
    }

    /// 在已持有账户写锁的前提下执行积分变动
    fn apply_locked(
        &self,
        account: &mut LoyaltyAccount,
        mutation: &PointsMutation,
    ) -> Result<PointsLedgerEntry> {
        let balance_before = account.points;
        let balance_after = balance_before + mutation.delta;
        if balance_after < 0 {
            return Err(LoyaltyError::InsufficientPoints {
                required: -mutation.delta,
                available: balance_before,
            });
        }

        let entry_id = self.next_id();
        if mutation.unique_per_booking {
            let booking_id = mutation.references.booking_id.ok_or_else(|| {
                LoyaltyError::Internal("unique_per_booking 需要 booking_id".to_string())
            })?;
            match self.award_index.entry((booking_id, mutation.reason)) {
                Entry::Occupied(_) => return Err(LoyaltyError::DuplicateAward(booking_id)),
                Entry::Vacant(slot) => {
                    slot.insert(entry_id);
                }
            }
        }

        let now = Utc::now();
        account.points = balance_after;
        if let Some(stay) = mutation.stay {
            account.lifetime_stays += stay.stays;
            account.lifetime_nights += stay.nights;
            account.lifetime_spend += stay.spend;
        }
        account.updated_at = now;

        let entry = PointsLedgerEntry {
            id: entry_id,
            account_id: account.id,
            points: mutation.delta,
            reason: mutation.reason,
            description: mutation.description.clone(),
            balance_before,
            balance_after,
            references: mutation.references.clone(),
            created_at: now,
        };
        self.ledger.entry(account.id).or_default().push(entry.clone());
        Ok(entry)
    }

    fn all_entries(&self) -> Vec<PointsLedgerEntry> {
        self.ledger
            .iter()
            .flat_map(|entries| entries.value().clone())
            .collect()
    }
}

#[async_trait]
impl AccountRepositoryTrait for MemoryLoyaltyStore {
    async fn get_account(&self, account_id: i64) -> Result<Option<LoyaltyAccount>> {
        Ok(self.accounts.get(&account_id).map(|a| a.clone()))
    }

    async fn get_account_by_user(&self, user_id: &str) -> Result<Option<LoyaltyAccount>> {
        let Some(id) = self.user_index.get(user_id).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn get_or_create_account(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<LoyaltyAccount> {
        match self.user_index.entry(user_id.to_string()) {
            Entry::Occupied(slot) => self
                .accounts
                .get(slot.get())
                .map(|a| a.clone())
                .ok_or_else(|| LoyaltyError::AccountNotFound(user_id.to_string())),
            Entry::Vacant(slot) => {
                let account = LoyaltyAccount::new(self.next_id(), user_id, today);
                self.accounts.insert(account.id, account.clone());
                slot.insert(account.id);
                Ok(account)
            }
        }
    }

    async fn count_members_by_tier(&self) -> Result<Vec<(Tier, i64)>> {
        let mut counts: BTreeMap<Tier, i64> = BTreeMap::new();
        for account in self.accounts.iter() {
            *counts.entry(account.tier).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn total_outstanding_points(&self) -> Result<i64> {
        Ok(self.accounts.iter().map(|a| a.points).sum())
    }

    async fn list_due_for_requalification(
        &self,
        check_date: NaiveDate,
    ) -> Result<Vec<LoyaltyAccount>> {
        let mut accounts: Vec<LoyaltyAccount> = self
            .accounts
            .iter()
            .filter(|a| a.requalification_due(check_date))
            .map(|a| a.value().clone())
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn apply_tier_review(
        &self,
        account_id: i64,
        review: &TierReview,
    ) -> Result<Option<TierHistory>> {
        let mut account = self
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| LoyaltyError::AccountNotFound(account_id.to_string()))?;
        if !review.applies_to(&account) {
            return Ok(None);
        }

        let change = review
            .ladder
            .evaluate_change(&account, review.policy, review.today);
        let now = Utc::now();
        if review.advance_year {
            let (start, end) = account.next_qualification_year();
            account.qualification_year_start = start;
            account.qualification_year_end = end;
            account.updated_at = now;
        }

        let Some(change) = change else {
            return Ok(None);
        };
        account.tier = change.to_tier;
        account.updated_at = now;

        let history = TierHistory {
            id: self.next_id(),
            account_id,
            from_tier: change.from_tier,
            to_tier: change.to_tier,
            metrics: change.metrics,
            reason: change.reason,
            created_at: now,
        };
        self.tier_history
            .entry(account_id)
            .or_default()
            .push(history.clone());
        Ok(Some(history))
    }

    async fn list_tier_history(&self, account_id: i64) -> Result<Vec<TierHistory>> {
        let mut history = self
            .tier_history
            .get(&account_id)
            .map(|h| h.clone())
            .unwrap_or_default();
        history.reverse();
        Ok(history)
    }
}

#[async_trait]
impl LedgerRepositoryTrait for MemoryLoyaltyStore {
    async fn apply_points(&self, mutation: PointsMutation) -> Result<PointsLedgerEntry> {
        let mut account = self
            .accounts
            .get_mut(&mutation.account_id)
            .ok_or_else(|| LoyaltyError::AccountNotFound(mutation.account_id.to_string()))?;
        self.apply_locked(&mut account, &mutation)
    }

    async fn list_entries(&self, account_id: i64, limit: i64) -> Result<Vec<PointsLedgerEntry>> {
        let entries = self
            .ledger
            .get(&account_id)
            .map(|e| e.clone())
            .unwrap_or_default();
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(entries.into_iter().rev().take(limit).collect())
    }

    async fn list_entries_since(
        &self,
        account_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<PointsLedgerEntry>> {
        Ok(self
            .ledger
            .get(&account_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.created_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PointsLedgerEntry>> {
        let mut entries: Vec<PointsLedgerEntry> = self
            .all_entries()
            .into_iter()
            .filter(|e| e.created_at >= from && e.created_at <= to)
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn find_booking_entry(
        &self,
        booking_id: i64,
        reason: LedgerReason,
    ) -> Result<Option<PointsLedgerEntry>> {
        Ok(self
            .all_entries()
            .into_iter()
            .filter(|e| e.reason == reason && e.references.booking_id == Some(booking_id))
            .min_by_key(|e| e.id))
    }
}

#[async_trait]
impl ConfigRepositoryTrait for MemoryLoyaltyStore {
    async fn list_tier_configs(&self) -> Result<Vec<TierConfig>> {
        Ok(self.tier_configs.read().clone())
    }

    async fn list_active_points_rules(&self, at: DateTime<Utc>) -> Result<Vec<PointsRule>> {
        let mut rules: Vec<PointsRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.active && r.window.contains(at))
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn list_active_campaigns(&self, at: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .campaigns
            .read()
            .iter()
            .filter(|c| c.active && c.window.contains(at))
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.id);
        Ok(campaigns)
    }

    async fn get_perk(&self, perk_id: i64) -> Result<Option<Perk>> {
        Ok(self.perks.get(&perk_id).map(|p| p.clone()))
    }

    async fn list_active_perks(&self) -> Result<Vec<Perk>> {
        let mut perks: Vec<Perk> = self
            .perks
            .iter()
            .filter(|p| p.active)
            .map(|p| p.value().clone())
            .collect();
        perks.sort_by_key(|p| p.id);
        Ok(perks)
    }

    async fn get_redemption_item(&self, item_id: i64) -> Result<Option<RedemptionItem>> {
        Ok(self.items.get(&item_id).map(|i| i.clone()))
    }

    async fn list_active_redemption_items(&self) -> Result<Vec<RedemptionItem>> {
        let mut items: Vec<RedemptionItem> = self
            .items
            .iter()
            .filter(|i| i.active)
            .map(|i| i.value().clone())
            .collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }
}

fn count_usage(
    redemptions: &[PerkRedemption],
    predicate: impl Fn(&PerkRedemption) -> bool,
) -> i64 {
    redemptions
        .iter()
        .filter(|r| r.status.counts_toward_limits() && predicate(r))
        .count() as i64
}

#[async_trait]
impl PerkRepositoryTrait for MemoryLoyaltyStore {
    async fn count_member_usage(&self, perk_id: i64, account_id: i64) -> Result<i64> {
        Ok(self
            .perk_redemptions
            .get(&perk_id)
            .map(|r| count_usage(&r, |p| p.loyalty_account_id == account_id))
            .unwrap_or(0))
    }

    async fn count_stay_usage(&self, perk_id: i64, booking_id: i64) -> Result<i64> {
        Ok(self
            .perk_redemptions
            .get(&perk_id)
            .map(|r| count_usage(&r, |p| p.booking_id == Some(booking_id)))
            .unwrap_or(0))
    }

    async fn reserve(
        &self,
        redemption: NewPerkRedemption,
        limits: PerkLimits,
    ) -> Result<PerkRedemption> {
        let mut perk = self
            .perks
            .get_mut(&redemption.perk_id)
            .ok_or(LoyaltyError::PerkNotFound(redemption.perk_id))?;

        if limits.total_capacity.is_some_and(|cap| perk.current_usage >= cap) {
            return Err(LoyaltyError::CapacityExceeded {
                reason: "Perk capacity reached".to_string(),
            });
        }

        let mut records = self.perk_redemptions.entry(redemption.perk_id).or_default();
        if let Some(max) = limits.max_usage_per_member {
            let used = count_usage(&records, |p| {
                p.loyalty_account_id == redemption.loyalty_account_id
            });
            if used >= max {
                return Err(LoyaltyError::CapacityExceeded {
                    reason: "Member limit reached".to_string(),
                });
            }
        }
        if let (Some(max), Some(booking_id)) = (limits.max_usage_per_stay, redemption.booking_id) {
            if count_usage(&records, |p| p.booking_id == Some(booking_id)) >= max {
                return Err(LoyaltyError::CapacityExceeded {
                    reason: "Stay limit reached".to_string(),
                });
            }
        }

        let record = PerkRedemption {
            id: self.next_id(),
            perk_id: redemption.perk_id,
            loyalty_account_id: redemption.loyalty_account_id,
            booking_id: redemption.booking_id,
            status: PerkRedemptionStatus::Active,
            value_applied: redemption.value_applied,
            created_at: Utc::now(),
        };
        records.push(record.clone());
        perk.current_usage += 1;
        Ok(record)
    }

    async fn list_by_account(&self, account_id: i64) -> Result<Vec<PerkRedemption>> {
        let mut records: Vec<PerkRedemption> = self
            .perk_redemptions
            .iter()
            .flat_map(|r| r.value().clone())
            .filter(|r| r.loyalty_account_id == account_id)
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PerkRedemption>> {
        let mut records: Vec<PerkRedemption> = self
            .perk_redemptions
            .iter()
            .flat_map(|r| r.value().clone())
            .filter(|r| r.created_at >= from && r.created_at <= to)
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

#[async_trait]
impl RedemptionRepositoryTrait for MemoryLoyaltyStore {
    async fn commit(
        &self,
        commit: RedemptionCommit,
    ) -> Result<(RedemptionTransaction, PointsLedgerEntry)> {
        let mut account = self
            .accounts
            .get_mut(&commit.loyalty_account_id)
            .ok_or_else(|| LoyaltyError::AccountNotFound(commit.loyalty_account_id.to_string()))?;
        if account.points < commit.points {
            return Err(LoyaltyError::InsufficientPoints {
                required: commit.points,
                available: account.points,
            });
        }

        let mut item = self
            .items
            .get_mut(&commit.item_id)
            .ok_or(LoyaltyError::ItemNotFound(commit.item_id))?;
        if !item.in_stock() {
            return Err(LoyaltyError::OutOfStock(commit.item_id));
        }

        let transaction_id = self.next_id();
        let mutation = PointsMutation::debit(
            commit.loyalty_account_id,
            commit.points,
            LedgerReason::Redemption,
        )
        .with_description(commit.description.clone())
        .with_references(LedgerReferences {
            booking_id: commit.booking_id,
            redemption_transaction_id: Some(transaction_id),
            ..Default::default()
        });
        let entry = self.apply_locked(&mut account, &mutation)?;

        item.sold_quantity += 1;
        if let Some(available) = item.available_quantity.as_mut() {
            *available -= 1;
        }

        let now = entry.created_at;
        let transaction = RedemptionTransaction {
            id: transaction_id,
            item_id: commit.item_id,
            loyalty_account_id: commit.loyalty_account_id,
            points_redeemed: commit.points,
            status: RedemptionStatus::Pending,
            booking_id: commit.booking_id,
            expires_at: commit.expires_at,
            used_at: None,
            created_at: now,
            updated_at: now,
        };
        self.transactions.insert(transaction_id, transaction.clone());
        Ok((transaction, entry))
    }

    async fn get_transaction(&self, transaction_id: i64) -> Result<Option<RedemptionTransaction>> {
        Ok(self.transactions.get(&transaction_id).map(|t| t.clone()))
    }

    async fn update_status(
        &self,
        transaction_id: i64,
        expected: RedemptionStatus,
        next: RedemptionStatus,
        used_at: Option<DateTime<Utc>>,
    ) -> Result<RedemptionTransaction> {
        let mut transaction = self
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))?;
        if transaction.status != expected {
            return Err(LoyaltyError::ConcurrencyConflict);
        }
        transaction.status = next;
        if transaction.used_at.is_none() {
            transaction.used_at = used_at;
        }
        transaction.updated_at = Utc::now();
        Ok(transaction.clone())
    }

    async fn cancel_with_refund(
        &self,
        transaction_id: i64,
        expected: RedemptionStatus,
    ) -> Result<(RedemptionTransaction, PointsLedgerEntry)> {
        let snapshot = self
            .transactions
            .get(&transaction_id)
            .map(|t| t.clone())
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))?;

        let mut account = self
            .accounts
            .get_mut(&snapshot.loyalty_account_id)
            .ok_or_else(|| {
                LoyaltyError::AccountNotFound(snapshot.loyalty_account_id.to_string())
            })?;
        let mut item = self.items.get_mut(&snapshot.item_id);
        let mut transaction = self
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))?;
        if transaction.status != expected {
            return Err(LoyaltyError::ConcurrencyConflict);
        }

        let mutation = PointsMutation::credit(
            transaction.loyalty_account_id,
            transaction.points_redeemed,
            LedgerReason::RedemptionRefund,
        )
        .with_references(LedgerReferences {
            booking_id: transaction.booking_id,
            redemption_transaction_id: Some(transaction_id),
            ..Default::default()
        });
        let entry = self.apply_locked(&mut account, &mutation)?;

        if let Some(item) = item.as_mut() {
            item.sold_quantity = (item.sold_quantity - 1).max(0);
            if let Some(available) = item.available_quantity.as_mut() {
                *available += 1;
            }
        }

        transaction.status = RedemptionStatus::Cancelled;
        transaction.updated_at = entry.created_at;
        Ok((transaction.clone(), entry))
    }

    async fn list_by_account(&self, account_id: i64) -> Result<Vec<RedemptionTransaction>> {
        let mut transactions: Vec<RedemptionTransaction> = self
            .transactions
            .iter()
            .filter(|t| t.loyalty_account_id == account_id)
            .map(|t| t.value().clone())
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(transactions)
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<RedemptionTransaction>> {
        let mut transactions: Vec<RedemptionTransaction> = self
            .transactions
            .iter()
            .filter(|t| matches!(t.status, RedemptionStatus::Pending | RedemptionStatus::Confirmed))
            .filter(|t| t.expires_at.is_some_and(|at| at < now))
            .map(|t| t.value().clone())
            .collect();
        transactions.sort_by_key(|t| t.id);
        Ok(transactions)
    }

    async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RedemptionTransaction>> {
        let mut transactions: Vec<RedemptionTransaction> = self
            .transactions
            .iter()
            .filter(|t| t.created_at >= from && t.created_at <= to)
            .map(|t| t.value().clone())
            .collect();
        transactions.sort_by_key(|t| t.id);
        Ok(transactions)
    }
}

#[async_trait]
impl BookingDirectoryTrait for MemoryLoyaltyStore {
    async fn get_booking(&self, booking_id: i64) -> Result<Option<BookingSnapshot>> {
        Ok(self.bookings.get(&booking_id).map(|b| b.clone()))
    }

    async fn count_user_bookings_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id && b.created_at >= since)
            .count() as i64)
    }
}
