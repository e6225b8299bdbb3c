//! 会员账户与积分账本实体

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{LedgerReason, Tier, TierChangeReason};

/// 会员积分账户
///
/// 每个用户唯一一条；余额与等级只能通过账本和定级操作修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyAccount {
    pub id: i64,
    pub user_id: String,
    pub tier: Tier,
    /// 当前积分余额，等于最近一条流水的 balance_after
    pub points: i64,
    pub lifetime_stays: i64,
    pub lifetime_nights: i64,
    pub lifetime_spend: f64,
    pub qualification_year_start: NaiveDate,
    pub qualification_year_end: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoyaltyAccount {
    /// 新开户：普通会员、零积分，资格年度从开户当天起算一年
    pub fn new(id: i64, user_id: impl Into<String>, today: NaiveDate) -> Self {
        let now = Utc::now();
        let (start, end) = qualification_year_from(today);
        Self {
            id,
            user_id: user_id.into(),
            tier: Tier::Member,
            points: 0,
            lifetime_stays: 0,
            lifetime_nights: 0,
            lifetime_spend: 0.0,
            qualification_year_start: start,
            qualification_year_end: end,
            created_at: now,
            updated_at: now,
        }
    }

    /// 定级指标快照
    pub fn metrics(&self) -> TierMetrics {
        TierMetrics {
            points: self.points,
            stays: self.lifetime_stays,
            nights: self.lifetime_nights,
            spend: self.lifetime_spend,
        }
    }

    /// 资格年度是否已结束
    pub fn qualification_year_ended(&self, today: NaiveDate) -> bool {
        self.qualification_year_end < today
    }

    /// 是否到了重新定级的时间：非普通会员且资格年度已到期（end <= check_date）
    pub fn requalification_due(&self, check_date: NaiveDate) -> bool {
        self.tier != Tier::Member && self.qualification_year_end <= check_date
    }

    /// 下一个资格年度：旧年度结束次日起，整一年
    pub fn next_qualification_year(&self) -> (NaiveDate, NaiveDate) {
        let start = self.qualification_year_end.succ_opt().unwrap_or(self.qualification_year_end);
        let end = self
            .qualification_year_end
            .checked_add_months(Months::new(12))
            .unwrap_or(start);
        (start, end)
    }
}

/// 从给定日期开始的资格年度 `[start, start + 1 年 - 1 天]`
pub fn qualification_year_from(start: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end = start
        .checked_add_months(Months::new(12))
        .and_then(|d| d.pred_opt())
        .unwrap_or(start);
    (start, end)
}

/// 定级指标
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierMetrics {
    pub points: i64,
    pub stays: i64,
    pub nights: i64,
    pub spend: f64,
}

/// 住宿指标增量，随入账在同一事务内累加
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StayDelta {
    pub stays: i64,
    pub nights: i64,
    pub spend: f64,
}

/// 流水关联引用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReferences {
    pub booking_id: Option<i64>,
    /// 命中的积分规则
    #[serde(default)]
    pub rule_ids: Vec<i64>,
    /// 命中的营销活动
    #[serde(default)]
    pub campaign_ids: Vec<i64>,
    pub perk_id: Option<i64>,
    pub redemption_transaction_id: Option<i64>,
}

/// 积分流水
///
/// 只追加、不修改；每条都满足 `balance_after = balance_before + points`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsLedgerEntry {
    pub id: i64,
    pub account_id: i64,
    /// 带符号的变动值：入账为正，扣减为负
    pub points: i64,
    pub reason: LedgerReason,
    pub description: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub references: LedgerReferences,
    pub created_at: DateTime<Utc>,
}

impl PointsLedgerEntry {
    /// 账本恒等式是否成立
    pub fn is_balanced(&self) -> bool {
        self.balance_after == self.balance_before + self.points
    }
}

/// 一次积分变动请求（仓储层原子执行）
#[derive(Debug, Clone, PartialEq)]
pub struct PointsMutation {
    pub account_id: i64,
    /// 带符号的变动值
    pub delta: i64,
    pub reason: LedgerReason,
    pub description: Option<String>,
    pub references: LedgerReferences,
    /// 同一事务内累加的住宿指标
    pub stay: Option<StayDelta>,
    /// 为 true 时同一 (booking_id, reason) 至多入账一次
    pub unique_per_booking: bool,
}

impl PointsMutation {
    pub fn credit(account_id: i64, points: i64, reason: LedgerReason) -> Self {
        Self {
            account_id,
            delta: points,
            reason,
            description: None,
            references: LedgerReferences::default(),
            stay: None,
            unique_per_booking: false,
        }
    }

    pub fn debit(account_id: i64, points: i64, reason: LedgerReason) -> Self {
        Self::credit(account_id, -points, reason)
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_references(mut self, references: LedgerReferences) -> Self {
        self.references = references;
        self
    }
}

/// 等级变更审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierHistory {
    pub id: i64,
    pub account_id: i64,
    pub from_tier: Tier,
    pub to_tier: Tier,
    pub metrics: TierMetrics,
    pub reason: TierChangeReason,
    pub created_at: DateTime<Utc>,
}

/// 待写入的等级变更
#[derive(Debug, Clone, PartialEq)]
pub struct TierChange {
    pub account_id: i64,
    pub from_tier: Tier,
    pub to_tier: Tier,
    pub metrics: TierMetrics,
    pub reason: TierChangeReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_new_account_defaults() {
        let account = LoyaltyAccount::new(1, "user-1", date(2026, 3, 15));
        assert_eq!(account.tier, Tier::Member);
        assert_eq!(account.points, 0);
        assert_eq!(account.qualification_year_start, date(2026, 3, 15));
        assert_eq!(account.qualification_year_end, date(2027, 3, 14));
    }

    #[test]
    fn test_next_qualification_year_starts_day_after_end() {
        let mut account = LoyaltyAccount::new(1, "user-1", date(2025, 1, 1));
        account.qualification_year_end = date(2025, 12, 31);
        let (start, end) = account.next_qualification_year();
        assert_eq!(start, date(2026, 1, 1));
        assert_eq!(end, date(2026, 12, 31));
    }

    #[test]
    fn test_qualification_year_ended() {
        let mut account = LoyaltyAccount::new(1, "user-1", date(2025, 1, 1));
        account.qualification_year_end = date(2025, 12, 31);
        assert!(!account.qualification_year_ended(date(2025, 12, 31)));
        assert!(account.qualification_year_ended(date(2026, 1, 1)));
    }

    #[test]
    fn test_requalification_due() {
        let mut account = LoyaltyAccount::new(1, "user-1", date(2025, 1, 1));
        assert!(!account.requalification_due(date(2026, 1, 1)));

        account.tier = Tier::Gold;
        assert!(!account.requalification_due(date(2025, 12, 30)));
        assert!(account.requalification_due(date(2025, 12, 31)));
    }

    #[test]
    fn test_mutation_builders() {
        let debit = PointsMutation::debit(9, 500, LedgerReason::Redemption);
        assert_eq!(debit.delta, -500);
        assert!(!debit.unique_per_booking);

        let entry = PointsLedgerEntry {
            id: 1,
            account_id: 9,
            points: -500,
            reason: LedgerReason::Redemption,
            description: None,
            balance_before: 800,
            balance_after: 300,
            references: LedgerReferences::default(),
            created_at: Utc::now(),
        };
        assert!(entry.is_balanced());
    }
}
