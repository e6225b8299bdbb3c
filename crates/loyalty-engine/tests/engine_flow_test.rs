//! 积分引擎完整流程集成测试
//!
//! 基于内存存储运行真实服务，无需外部依赖

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use loyalty_engine::dto::{
    AwardPointsRequest, BookingAward, FraudCheckTransaction, PerkContext,
    ProcessRedemptionRequest, RedeemPerkRequest, RedeemPointsRequest, RedemptionContext,
    TierCriterion,
};
use loyalty_engine::{
    BookingSnapshot, BookingSource, BookingStatus, Campaign, CampaignRules, DateWindow,
    DynamicPricing, EngineSettings, FraudRecommendation, LedgerReason, LoyaltyAccount,
    LoyaltyEngine, LoyaltyError, MemoryLoyaltyStore, Perk, PerkConditions, PerkValue,
    PointsMutation, PointsRule, PricingAdjustment, PricingRule, RedemptionItem, RedemptionStatus,
    RedemptionValue, Repositories, RewardKind, RuleAction, RuleCondition, Scope, Tier, TierConfig,
    TierHistory, TierReview,
};
use loyalty_engine::repository::{
    AccountRepositoryTrait, ConfigRepositoryTrait, LedgerRepositoryTrait,
};

// ==================== 测试数据 ====================

fn tier_config(tier: Tier, sort_order: i32, base_points_per_100: f64) -> TierConfig {
    TierConfig {
        tier,
        sort_order,
        min_points: None,
        min_stays: None,
        min_nights: None,
        min_spend: None,
        base_points_per_100,
        active: true,
    }
}

/// MEMBER(0)、SILVER(minStays=5)、GOLD(minPoints=25000)
fn seeded_store() -> Arc<MemoryLoyaltyStore> {
    let store = Arc::new(MemoryLoyaltyStore::new());
    store.insert_tier_config(tier_config(Tier::Member, 0, 10.0));
    store.insert_tier_config(TierConfig {
        min_stays: Some(5),
        ..tier_config(Tier::Silver, 1, 12.0)
    });
    store.insert_tier_config(TierConfig {
        min_points: Some(25_000),
        ..tier_config(Tier::Gold, 2, 15.0)
    });
    store
}

fn engine(store: &Arc<MemoryLoyaltyStore>) -> LoyaltyEngine {
    LoyaltyEngine::in_memory(store.clone(), EngineSettings::default())
}

/// 2026-05-01 是周五
fn friday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 14, 0, 0).unwrap()
}

fn tuesday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 5, 14, 0, 0).unwrap()
}

fn booking(booking_id: i64, user_id: &str, revenue: f64, check_in: DateTime<Utc>) -> BookingSnapshot {
    BookingSnapshot {
        booking_id,
        user_id: user_id.to_string(),
        room_revenue: revenue,
        add_on_revenue: 0.0,
        check_in,
        check_out: check_in + Duration::days(2),
        source: BookingSource::Direct,
        property_id: 1,
        room_type_id: Some(101),
        is_prepaid: false,
        room_type_category: None,
        confirmation_number: format!("CONF-{}", booking_id),
        status: BookingStatus::Completed,
        created_at: Utc::now(),
    }
}

fn points_rule(id: i64, priority: i32, conditions: Vec<RuleCondition>, action: RuleAction) -> PointsRule {
    PointsRule {
        id,
        name: format!("rule-{}", id),
        conditions,
        action,
        priority,
        active: true,
        window: DateWindow::default(),
        property_ids: Scope::All,
        tier_ids: Scope::All,
    }
}

fn item(id: i64, base_points_required: i64) -> RedemptionItem {
    RedemptionItem {
        id,
        name: format!("item-{}", id),
        base_points_required,
        dynamic_pricing: DynamicPricing::default(),
        total_quantity: None,
        sold_quantity: 0,
        available_quantity: None,
        tier_ids: Scope::All,
        property_ids: Scope::All,
        room_type_ids: Scope::All,
        value: RedemptionValue {
            kind: RewardKind::FreeNight,
            amount: Some(150.0),
            expires_in_days: None,
        },
        window: DateWindow::default(),
        active: true,
    }
}

fn perk(id: i64) -> Perk {
    Perk {
        id,
        name: format!("perk-{}", id),
        conditions: PerkConditions::default(),
        tier_ids: Scope::All,
        property_ids: Scope::All,
        total_capacity: None,
        max_usage_per_member: None,
        max_usage_per_stay: None,
        current_usage: 0,
        value: PerkValue {
            amount: Some(20.0),
            description: Some("欢迎饮品".to_string()),
        },
        active: true,
    }
}

async fn funded_account(engine: &LoyaltyEngine, user_id: &str, points: i64) -> LoyaltyAccount {
    let account = engine.get_or_create_account(user_id).await.unwrap();
    if points > 0 {
        engine
            .ledger
            .award_points(AwardPointsRequest::new(account.id, points, LedgerReason::Bonus))
            .await
            .unwrap();
    }
    engine.get_account(account.id).await.unwrap().unwrap()
}

/// 在服务的读取与写入之间插入一次外部写入的账户仓储
struct InterleavedAccounts {
    store: Arc<MemoryLoyaltyStore>,
    interleave: Interleave,
    fired: AtomicBool,
}

#[derive(Clone, Copy)]
enum Interleave {
    /// 定级写入前，另一写入方已把账户改为银卡
    SilverBeforeReview,
    /// 到期列表返回后，列表中的账户各入账指定积分
    CreditAfterListing(i64),
}

impl InterleavedAccounts {
    fn engine(store: &Arc<MemoryLoyaltyStore>, interleave: Interleave) -> LoyaltyEngine {
        let mut repos = Repositories::in_memory(store.clone());
        repos.accounts = Arc::new(Self {
            store: store.clone(),
            interleave,
            fired: AtomicBool::new(false),
        });
        LoyaltyEngine::new(repos, EngineSettings::default())
    }

    fn fire_once(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountRepositoryTrait for InterleavedAccounts {
    async fn get_account(&self, account_id: i64) -> loyalty_engine::Result<Option<LoyaltyAccount>> {
        self.store.get_account(account_id).await
    }

    async fn get_account_by_user(
        &self,
        user_id: &str,
    ) -> loyalty_engine::Result<Option<LoyaltyAccount>> {
        self.store.get_account_by_user(user_id).await
    }

    async fn get_or_create_account(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> loyalty_engine::Result<LoyaltyAccount> {
        self.store.get_or_create_account(user_id, today).await
    }

    async fn count_members_by_tier(&self) -> loyalty_engine::Result<Vec<(Tier, i64)>> {
        self.store.count_members_by_tier().await
    }

    async fn total_outstanding_points(&self) -> loyalty_engine::Result<i64> {
        self.store.total_outstanding_points().await
    }

    async fn list_due_for_requalification(
        &self,
        check_date: NaiveDate,
    ) -> loyalty_engine::Result<Vec<LoyaltyAccount>> {
        let due = self.store.list_due_for_requalification(check_date).await?;
        if let Interleave::CreditAfterListing(points) = self.interleave {
            if self.fire_once() {
                for account in &due {
                    self.store
                        .apply_points(PointsMutation::credit(account.id, points, LedgerReason::Bonus))
                        .await?;
                }
            }
        }
        Ok(due)
    }

    async fn apply_tier_review(
        &self,
        account_id: i64,
        review: &TierReview,
    ) -> loyalty_engine::Result<Option<TierHistory>> {
        if matches!(self.interleave, Interleave::SilverBeforeReview) && self.fire_once() {
            if let Some(mut account) = self.store.get_account(account_id).await? {
                account.tier = Tier::Silver;
                self.store.insert_account(account);
            }
        }
        self.store.apply_tier_review(account_id, review).await
    }

    async fn list_tier_history(&self, account_id: i64) -> loyalty_engine::Result<Vec<TierHistory>> {
        self.store.list_tier_history(account_id).await
    }
}

// ==================== 等级 ====================

#[tokio::test]
async fn test_calculate_tier_or_semantics() {
    let store = seeded_store();
    let engine = engine(&store);

    let tier = engine
        .tiers
        .calculate_tier(&loyalty_engine::TierMetrics {
            points: 30_000,
            stays: 2,
            nights: 0,
            spend: 0.0,
        })
        .await
        .unwrap();
    assert_eq!(tier, Tier::Gold);

    let by_stays = engine
        .tiers
        .calculate_tier(&loyalty_engine::TierMetrics {
            points: 100,
            stays: 5,
            nights: 0,
            spend: 0.0,
        })
        .await
        .unwrap();
    assert_eq!(by_stays, Tier::Silver);
}

#[tokio::test]
async fn test_tier_progress_reports_gap_to_next_tier() {
    let store = seeded_store();
    let engine = engine(&store);
    let account = engine.get_or_create_account("progress-user").await.unwrap();

    let progress = engine.tiers.get_tier_progress(account.id).await.unwrap();
    assert_eq!(progress.current_tier, Tier::Member);
    assert_eq!(progress.next_tier, Some(Tier::Silver));
    assert_eq!(progress.gaps.len(), 1);
    assert_eq!(progress.gaps[0].criterion, TierCriterion::Stays);
    assert_eq!(progress.gaps[0].remaining, 5.0);
}

#[tokio::test]
async fn test_requalification_downgrades_only_after_year_end() {
    let store = seeded_store();
    let engine = engine(&store);

    let mut expired = LoyaltyAccount::new(1_000, "expired-user", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    expired.tier = Tier::Gold;
    store.insert_account(expired);

    let mut active = LoyaltyAccount::new(1_001, "active-user", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
    active.tier = Tier::Gold;
    store.insert_account(active);

    let summary = engine
        .tiers
        .process_tier_requalification(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.downgraded, 1);
    assert!(summary.errors.is_empty());

    let expired = engine.get_account(1_000).await.unwrap().unwrap();
    assert_eq!(expired.tier, Tier::Member);
    assert_eq!(
        expired.qualification_year_start,
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    );
    let history = engine.tiers.get_tier_history(1_000).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_tier, Tier::Gold);
    assert_eq!(history[0].to_tier, Tier::Member);

    let active = engine.get_account(1_001).await.unwrap().unwrap();
    assert_eq!(active.tier, Tier::Gold);
}

#[tokio::test]
async fn test_upgrade_survives_concurrent_tier_change() {
    let store = seeded_store();
    let engine = InterleavedAccounts::engine(&store, Interleave::SilverBeforeReview);
    let mut member = LoyaltyAccount::new(2_000, "racing-user", Utc::now().date_naive());
    member.points = 30_000;
    store.insert_account(member);

    // 服务决定定级后，另一写入方先把账户改成了银卡
    let history = engine
        .tiers
        .check_and_update_tier(2_000, false)
        .await
        .unwrap()
        .expect("锁内应重新评估为金卡");
    assert_eq!(history.from_tier, Tier::Silver);
    assert_eq!(history.to_tier, Tier::Gold);

    let account = engine.get_account(2_000).await.unwrap().unwrap();
    assert_eq!(account.tier, Tier::Gold);
    assert_eq!(account.points, 30_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_awards_and_tier_checks_never_conflict() {
    let store = seeded_store();
    let engine = Arc::new(engine(&store));
    let account_id = funded_account(&engine, "busy-user", 0).await.id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let award_engine = engine.clone();
        handles.push(tokio::spawn(async move {
            award_engine
                .ledger
                .award_points(AwardPointsRequest::new(account_id, 5_000, LedgerReason::Bonus))
                .await
                .map(|_| ())
        }));
        let tier_engine = engine.clone();
        handles.push(tokio::spawn(async move {
            tier_engine
                .tiers
                .check_and_update_tier(account_id, false)
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 最后一次入账后的升级检查在锁内看到 40000 积分
    let account = engine.get_account(account_id).await.unwrap().unwrap();
    assert_eq!(account.points, 40_000);
    assert_eq!(account.tier, Tier::Gold);
    let history = engine.tiers.get_tier_history(account_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].to_tier, Tier::Gold);
}

#[tokio::test]
async fn test_requalification_uses_metrics_credited_after_listing() {
    let store = seeded_store();
    let engine = InterleavedAccounts::engine(&store, Interleave::CreditAfterListing(30_000));
    let mut gold = LoyaltyAccount::new(3_000, "late-credit", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    gold.tier = Tier::Gold;
    gold.points = 1_000;
    store.insert_account(gold);

    let summary = engine
        .tiers
        .process_tier_requalification(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.downgraded, 0);
    assert_eq!(summary.unchanged, 1);

    let account = engine.get_account(3_000).await.unwrap().unwrap();
    assert_eq!(account.tier, Tier::Gold);
    assert_eq!(account.points, 31_000);
    assert_eq!(
        account.qualification_year_start,
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    );
    assert!(engine.tiers.get_tier_history(3_000).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_requalification_runs_advance_year_once() {
    let store = seeded_store();
    let engine = Arc::new(engine(&store));
    for id in 4_000..4_010 {
        let mut account = LoyaltyAccount::new(id, format!("overlap-{}", id), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        account.tier = Tier::Gold;
        account.points = if id % 2 == 0 { 100 } else { 30_000 };
        store.insert_account(account);
    }
    let check_date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.tiers.process_tier_requalification(check_date).await })
        })
        .collect();
    let mut downgraded = 0;
    for handle in handles {
        let summary = handle.await.unwrap().unwrap();
        assert!(summary.errors.is_empty());
        downgraded += summary.downgraded;
    }
    assert_eq!(downgraded, 5);

    for id in 4_000..4_010 {
        let account = engine.get_account(id).await.unwrap().unwrap();
        assert_eq!(
            account.qualification_year_start,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        );
        let expected = if id % 2 == 0 { Tier::Member } else { Tier::Gold };
        assert_eq!(account.tier, expected);
        let history = engine.tiers.get_tier_history(id).await.unwrap();
        assert_eq!(history.len(), usize::from(id % 2 == 0));
    }
}

// ==================== 预订入账 ====================

#[tokio::test]
async fn test_booking_base_points_only() {
    let store = seeded_store();
    let engine = engine(&store);

    let award = engine
        .booking_rewards
        .award_points_for_booking(&booking(1, "user-1", 10_000.0, tuesday()))
        .await
        .unwrap();

    let BookingAward::Awarded { entry, calculation, tier_change } = award else {
        panic!("首次入账应返回 Awarded");
    };
    assert_eq!(calculation.base_points, 1_000);
    assert_eq!(calculation.total_points, 1_000);
    assert_eq!(entry.points, 1_000);
    assert_eq!(entry.balance_after, 1_000);
    assert!(tier_change.is_none());

    let account = engine.get_account(entry.account_id).await.unwrap().unwrap();
    assert_eq!(account.points, 1_000);
    assert_eq!(account.lifetime_stays, 1);
    assert_eq!(account.lifetime_nights, 2);
    assert_eq!(account.lifetime_spend, 10_000.0);
}

#[tokio::test]
async fn test_booking_rules_stack_multiplier_and_bonus() {
    let store = seeded_store();
    store.insert_points_rule(points_rule(
        1,
        10,
        vec![RuleCondition::Weekend { is_weekend: true }],
        RuleAction::Multiplier { value: 2.0 },
    ));
    store.insert_points_rule(points_rule(2, 5, Vec::new(), RuleAction::BonusPoints { value: 50 }));
    let engine = engine(&store);

    let award = engine
        .booking_rewards
        .award_points_for_booking(&booking(2, "user-2", 10_000.0, friday()))
        .await
        .unwrap();

    let BookingAward::Awarded { entry, calculation, .. } = award else {
        panic!("首次入账应返回 Awarded");
    };
    assert_eq!(calculation.multiplier, 2.0);
    assert_eq!(calculation.bonus_points, 50);
    assert_eq!(calculation.total_points, 2_050);
    assert_eq!(entry.points, 2_050);
    assert_eq!(entry.references.booking_id, Some(2));
    assert_eq!(entry.references.rule_ids.len(), 2);
}

#[tokio::test]
async fn test_booking_campaign_bonus_applies_in_window() {
    let store = seeded_store();
    store.insert_campaign(Campaign {
        id: 7,
        name: "五一双倍".to_string(),
        tier_ids: Scope::All,
        property_ids: Scope::only([1]),
        window: DateWindow::new(Some(friday() - Duration::days(1)), Some(friday() + Duration::days(3))),
        rules: CampaignRules {
            multiplier: Some(2.0),
            bonus_points: Some(100),
        },
        active: true,
    });
    let engine = engine(&store);

    let in_window = engine
        .booking_rewards
        .award_points_for_booking(&booking(3, "user-3", 10_000.0, friday()))
        .await
        .unwrap();
    assert_eq!(in_window.entry().points, 2_100);
    assert_eq!(in_window.entry().references.campaign_ids, vec![7]);

    let later = engine
        .booking_rewards
        .award_points_for_booking(&booking(4, "user-3", 10_000.0, friday() + Duration::days(10)))
        .await
        .unwrap();
    assert_eq!(later.entry().points, 1_000);
}

#[tokio::test]
async fn test_booking_is_awarded_at_most_once() {
    let store = seeded_store();
    let engine = engine(&store);
    let stay = booking(5, "user-5", 10_000.0, tuesday());

    let first = engine.booking_rewards.award_points_for_booking(&stay).await.unwrap();
    let second = engine.booking_rewards.award_points_for_booking(&stay).await.unwrap();

    assert!(matches!(first, BookingAward::Awarded { .. }));
    let BookingAward::AlreadyAwarded { entry } = second else {
        panic!("重复入账应返回 AlreadyAwarded");
    };
    assert_eq!(entry.id, first.entry().id);

    let account = engine.get_account(entry.account_id).await.unwrap().unwrap();
    assert_eq!(account.points, 1_000);
    assert_eq!(account.lifetime_stays, 1);
}

#[tokio::test]
async fn test_ota_booking_counts_stay_without_points() {
    let store = seeded_store();
    let engine = engine(&store);
    let stay = BookingSnapshot {
        source: BookingSource::OtaAgoda,
        ..booking(6, "user-6", 10_000.0, tuesday())
    };

    let award = engine.booking_rewards.award_points_for_booking(&stay).await.unwrap();
    let BookingAward::Awarded { entry, calculation, .. } = award else {
        panic!("OTA 预订也应写入流水");
    };
    assert!(calculation.excluded_source);
    assert_eq!(entry.points, 0);

    let account = engine.get_account(entry.account_id).await.unwrap().unwrap();
    assert_eq!(account.points, 0);
    assert_eq!(account.lifetime_stays, 1);
    assert_eq!(account.lifetime_nights, 2);
}

#[tokio::test]
async fn test_booking_award_triggers_upgrade() {
    let store = seeded_store();
    let engine = engine(&store);

    let award = engine
        .booking_rewards
        .award_points_for_booking(&booking(8, "user-8", 250_000.0, tuesday()))
        .await
        .unwrap();
    let BookingAward::Awarded { entry, tier_change, .. } = award else {
        panic!("首次入账应返回 Awarded");
    };
    assert_eq!(entry.points, 25_000);
    let change = tier_change.expect("应触发升级");
    assert_eq!(change.from_tier, Tier::Member);
    assert_eq!(change.to_tier, Tier::Gold);

    let account = engine.get_account(entry.account_id).await.unwrap().unwrap();
    assert_eq!(account.tier, Tier::Gold);
}

#[tokio::test]
async fn test_award_by_unknown_booking_id() {
    let store = seeded_store();
    let engine = engine(&store);

    let err = engine
        .booking_rewards
        .award_points_for_booking_id(404)
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::BookingNotFound(404)));

    store.insert_booking(booking(405, "user-405", 5_000.0, tuesday()));
    let award = engine
        .booking_rewards
        .award_points_for_booking_id(405)
        .await
        .unwrap();
    assert_eq!(award.entry().points, 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_booking_awards_credit_once() {
    let store = seeded_store();
    let engine = Arc::new(engine(&store));
    let stay = booking(9, "user-9", 10_000.0, tuesday());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = engine.clone();
            let stay = stay.clone();
            tokio::spawn(async move { engine.booking_rewards.award_points_for_booking(&stay).await })
        })
        .collect();

    let mut awarded = 0;
    for handle in handles {
        if let BookingAward::Awarded { .. } = handle.await.unwrap().unwrap() {
            awarded += 1;
        }
    }
    assert_eq!(awarded, 1);

    let account = engine.get_or_create_account("user-9").await.unwrap();
    assert_eq!(account.points, 1_000);
    assert_eq!(account.lifetime_stays, 1);
}

// ==================== 积分账本 ====================

#[tokio::test]
async fn test_award_then_redeem_round_trip() {
    let store = seeded_store();
    let engine = engine(&store);
    let account = funded_account(&engine, "round-trip", 1_200).await;

    let entry = engine
        .ledger
        .redeem_points(RedeemPointsRequest::new(account.id, 1_200, LedgerReason::ManualAdjustment))
        .await
        .unwrap();
    assert_eq!(entry.points, -1_200);
    assert_eq!(entry.balance_after, 0);

    let err = engine
        .ledger
        .redeem_points(RedeemPointsRequest::new(account.id, 1, LedgerReason::ManualAdjustment))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::InsufficientPoints {
            required: 1,
            available: 0
        }
    ));
}

#[tokio::test]
async fn test_award_rejects_non_positive_points() {
    let store = seeded_store();
    let engine = engine(&store);
    let account = funded_account(&engine, "invalid-points", 0).await;

    let err = engine
        .ledger
        .award_points(AwardPointsRequest::new(account.id, 0, LedgerReason::Bonus))
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidPoints(0)));
}

#[tokio::test]
async fn test_ledger_balances_chain() {
    let store = seeded_store();
    let engine = engine(&store);
    let account = funded_account(&engine, "chain", 500).await;

    engine
        .ledger
        .award_points(AwardPointsRequest::new(account.id, 300, LedgerReason::Bonus))
        .await
        .unwrap();
    engine
        .ledger
        .redeem_points(RedeemPointsRequest::new(account.id, 650, LedgerReason::ManualAdjustment))
        .await
        .unwrap();
    engine
        .booking_rewards
        .award_points_for_booking(&booking(20, "chain", 2_000.0, tuesday()))
        .await
        .unwrap();

    // 最新在前
    let mut history = engine.ledger.get_points_history(account.id, 50).await.unwrap();
    assert_eq!(history.len(), 4);
    history.reverse();

    let mut balance = 0;
    for entry in &history {
        assert!(entry.is_balanced());
        assert_eq!(entry.balance_before, balance);
        balance = entry.balance_after;
    }
    let account = engine.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.points, balance);
    assert_eq!(balance, 350);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redeems_never_overdraw() {
    let store = seeded_store();
    let engine = Arc::new(engine(&store));
    let account = funded_account(&engine, "concurrent", 1_000).await;

    let account_id = account.id;
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .ledger
                    .redeem_points(RedeemPointsRequest::new(
                        account_id,
                        200,
                        LedgerReason::ManualAdjustment,
                    ))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(e, LoyaltyError::InsufficientPoints { .. })),
        }
    }
    assert_eq!(succeeded, 5);
    let account = engine.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.points, 0);
}

// ==================== 权益 ====================

#[tokio::test]
async fn test_perk_member_limit_reached() {
    let store = seeded_store();
    store.insert_perk(Perk {
        max_usage_per_member: Some(1),
        ..perk(10)
    });
    let engine = engine(&store);
    let account = funded_account(&engine, "perk-user", 0).await;

    let check = engine.perks.check_perk_capacity(10, account.id, None).await.unwrap();
    assert!(check.available);

    let redemption = engine
        .perks
        .redeem_perk(RedeemPerkRequest {
            perk_id: 10,
            loyalty_account_id: account.id,
            booking_id: None,
        })
        .await
        .unwrap();
    assert_eq!(redemption.value_applied, 20.0);

    let check = engine.perks.check_perk_capacity(10, account.id, None).await.unwrap();
    assert!(!check.available);
    assert_eq!(check.reason.as_deref(), Some("Member limit reached"));

    let err = engine
        .perks
        .redeem_perk(RedeemPerkRequest {
            perk_id: 10,
            loyalty_account_id: account.id,
            booking_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::CapacityExceeded { .. }));
}

#[tokio::test]
async fn test_eligible_perks_respect_min_tier() {
    let store = seeded_store();
    store.insert_perk(perk(11));
    store.insert_perk(Perk {
        conditions: PerkConditions {
            min_tier: Some(Tier::Gold),
            ..PerkConditions::default()
        },
        ..perk(12)
    });
    let engine = engine(&store);
    let account = funded_account(&engine, "eligible-user", 0).await;

    let context = PerkContext {
        member_tier: Tier::Member,
        booking_source: None,
        stay_length: None,
        property_id: None,
        at: Utc::now(),
    };
    let eligible = engine
        .perks
        .get_eligible_perks(account.id, None, &context)
        .await
        .unwrap();
    let ids: Vec<i64> = eligible.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![11]);
}

#[tokio::test]
async fn test_apply_perks_to_booking_once_per_stay() {
    let store = seeded_store();
    store.insert_perk(Perk {
        max_usage_per_stay: Some(1),
        ..perk(13)
    });
    let engine = engine(&store);
    let stay = booking(30, "stay-user", 10_000.0, tuesday());
    engine.booking_rewards.award_points_for_booking(&stay).await.unwrap();

    let first = engine.perks.apply_perks_to_booking(&stay).await.unwrap();
    assert_eq!(first.applied.len(), 1);
    assert_eq!(first.applied[0].booking_id, Some(30));

    let second = engine.perks.apply_perks_to_booking(&stay).await.unwrap();
    assert!(second.applied.is_empty());
    assert!(second.skipped.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_perk_redeems_take_last_slot_once() {
    let store = seeded_store();
    store.insert_perk(Perk {
        total_capacity: Some(3),
        current_usage: 2,
        ..perk(14)
    });
    let engine = Arc::new(engine(&store));
    let mut account_ids = Vec::new();
    for i in 0..8 {
        account_ids.push(funded_account(&engine, &format!("slot-{}", i), 0).await.id);
    }

    let handles: Vec<_> = account_ids
        .into_iter()
        .map(|account_id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .perks
                    .redeem_perk(RedeemPerkRequest {
                        perk_id: 14,
                        loyalty_account_id: account_id,
                        booking_id: None,
                    })
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(
                matches!(e, LoyaltyError::CapacityExceeded { ref reason } if reason == "Perk capacity reached")
            ),
        }
    }
    assert_eq!(succeeded, 1);

    let perk = store.get_perk(14).await.unwrap().unwrap();
    assert_eq!(Some(perk.current_usage), perk.total_capacity);
}

// ==================== 积分兑换 ====================

#[tokio::test]
async fn test_dynamic_price_insufficient_points() {
    let store = seeded_store();
    store.insert_redemption_item(RedemptionItem {
        dynamic_pricing: DynamicPricing {
            dynamic: true,
            rules: vec![PricingRule {
                room_type_id: Some(101),
                property_id: None,
                season: None,
                adjustment: PricingAdjustment::Multiply { multiplier: 1.5 },
            }],
        },
        ..item(40, 5_000)
    });
    let engine = engine(&store);
    let account = funded_account(&engine, "redeemer", 5_000).await;

    let context = RedemptionContext {
        room_type_id: Some(101),
        ..RedemptionContext::at(Utc::now())
    };
    let validation = engine
        .redemptions
        .validate_redemption(account.id, 40, &context)
        .await
        .unwrap();
    assert!(!validation.valid);
    assert_eq!(validation.reason.as_deref(), Some("Insufficient points"));
    assert_eq!(validation.points_required, Some(7_500));
    assert_eq!(validation.points_available, Some(5_000));

    let err = engine
        .redemptions
        .process_redemption(ProcessRedemptionRequest {
            loyalty_account_id: account.id,
            item_id: 40,
            context,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::RedemptionRejected(reason) if reason == "Insufficient points"));

    // 其他房型按基础价格
    let other_room = RedemptionContext {
        room_type_id: Some(202),
        ..RedemptionContext::at(Utc::now())
    };
    let validation = engine
        .redemptions
        .validate_redemption(account.id, 40, &other_room)
        .await
        .unwrap();
    assert!(validation.valid);
    assert_eq!(validation.points_required, Some(5_000));
}

#[tokio::test]
async fn test_redemption_commit_cancel_refund() {
    let store = seeded_store();
    store.insert_redemption_item(RedemptionItem {
        total_quantity: Some(2),
        available_quantity: Some(2),
        ..item(41, 5_000)
    });
    let engine = engine(&store);
    let account = funded_account(&engine, "cancel-user", 20_000).await;

    let receipt = engine
        .redemptions
        .process_redemption(ProcessRedemptionRequest {
            loyalty_account_id: account.id,
            item_id: 41,
            context: RedemptionContext::at(Utc::now()),
        })
        .await
        .unwrap();
    assert_eq!(receipt.transaction.status, RedemptionStatus::Pending);
    assert_eq!(receipt.transaction.points_redeemed, 5_000);
    assert_eq!(receipt.ledger_entry.points, -5_000);
    assert_eq!(receipt.ledger_entry.balance_after, 15_000);

    let confirmed = engine
        .redemptions
        .update_redemption_status(receipt.transaction.id, RedemptionStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, RedemptionStatus::Confirmed);

    let cancellation = engine
        .redemptions
        .cancel_redemption(receipt.transaction.id)
        .await
        .unwrap();
    assert_eq!(cancellation.transaction.status, RedemptionStatus::Cancelled);
    let refund = cancellation.refund.expect("首次取消应退款");
    assert_eq!(refund.points, 5_000);
    assert_eq!(refund.reason, LedgerReason::RedemptionRefund);
    assert_eq!(refund.balance_after, 20_000);

    let again = engine
        .redemptions
        .cancel_redemption(receipt.transaction.id)
        .await
        .unwrap();
    assert!(again.refund.is_none());

    let err = engine
        .redemptions
        .update_redemption_status(receipt.transaction.id, RedemptionStatus::Used)
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidStatusTransition { .. }));

    let account = engine.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.points, 20_000);
    let catalog = engine
        .redemptions
        .get_redemption_catalog(account.id, &RedemptionContext::at(Utc::now()))
        .await
        .unwrap();
    assert_eq!(catalog[0].item.remaining(), Some(2));
}

#[tokio::test]
async fn test_redemption_out_of_stock() {
    let store = seeded_store();
    store.insert_redemption_item(RedemptionItem {
        total_quantity: Some(1),
        available_quantity: Some(1),
        ..item(42, 1_000)
    });
    let engine = engine(&store);
    let account = funded_account(&engine, "stock-user", 5_000).await;
    let request = || ProcessRedemptionRequest {
        loyalty_account_id: account.id,
        item_id: 42,
        context: RedemptionContext::at(Utc::now()),
    };

    engine.redemptions.process_redemption(request()).await.unwrap();
    let err = engine.redemptions.process_redemption(request()).await.unwrap_err();
    assert!(matches!(err, LoyaltyError::RedemptionRejected(reason) if reason == "Out of stock"));

    let account = engine.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.points, 4_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemptions_sell_last_unit_once() {
    let store = seeded_store();
    store.insert_redemption_item(RedemptionItem {
        total_quantity: Some(3),
        sold_quantity: 2,
        available_quantity: Some(1),
        ..item(44, 1_000)
    });
    let engine = Arc::new(engine(&store));
    let mut account_ids = Vec::new();
    for i in 0..8 {
        account_ids.push(funded_account(&engine, &format!("stock-{}", i), 2_000).await.id);
    }

    let handles: Vec<_> = account_ids
        .iter()
        .map(|&account_id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .redemptions
                    .process_redemption(ProcessRedemptionRequest {
                        loyalty_account_id: account_id,
                        item_id: 44,
                        context: RedemptionContext::at(Utc::now()),
                    })
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(
                e,
                LoyaltyError::OutOfStock(44) | LoyaltyError::RedemptionRejected(_)
            )),
        }
    }
    assert_eq!(succeeded, 1);

    let item = store.get_redemption_item(44).await.unwrap().unwrap();
    assert_eq!(Some(item.sold_quantity), item.total_quantity);
    assert_eq!(item.remaining(), Some(0));

    // 只有成功的一方被扣分
    let mut spent = 0;
    for account_id in account_ids {
        let account = engine.get_account(account_id).await.unwrap().unwrap();
        spent += 2_000 - account.points;
    }
    assert_eq!(spent, 1_000);
}

#[tokio::test]
async fn test_used_redemption_keeps_first_used_at() {
    let store = seeded_store();
    store.insert_redemption_item(item(43, 1_000));
    let engine = engine(&store);
    let account = funded_account(&engine, "used-user", 1_000).await;

    let receipt = engine
        .redemptions
        .process_redemption(ProcessRedemptionRequest {
            loyalty_account_id: account.id,
            item_id: 43,
            context: RedemptionContext::at(Utc::now()),
        })
        .await
        .unwrap();

    let used = engine
        .redemptions
        .update_redemption_status(receipt.transaction.id, RedemptionStatus::Used)
        .await
        .unwrap();
    let used_at = used.used_at.expect("核销时间应被记录");

    let again = engine
        .redemptions
        .update_redemption_status(receipt.transaction.id, RedemptionStatus::Used)
        .await
        .unwrap();
    assert_eq!(again.used_at, Some(used_at));

    let err = engine
        .redemptions
        .update_redemption_status(receipt.transaction.id, RedemptionStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn test_expire_redemptions_without_refund() {
    let store = seeded_store();
    store.insert_redemption_item(RedemptionItem {
        value: RedemptionValue {
            kind: RewardKind::Voucher,
            amount: Some(50.0),
            expires_in_days: Some(1),
        },
        ..item(44, 2_000)
    });
    let engine = engine(&store);
    let account = funded_account(&engine, "expiry-user", 3_000).await;

    let receipt = engine
        .redemptions
        .process_redemption(ProcessRedemptionRequest {
            loyalty_account_id: account.id,
            item_id: 44,
            context: RedemptionContext::at(Utc::now()),
        })
        .await
        .unwrap();
    assert!(receipt.transaction.expires_at.is_some());

    let not_yet = engine.redemptions.expire_redemptions(Utc::now()).await.unwrap();
    assert_eq!(not_yet.expired, 0);

    let summary = engine
        .redemptions
        .expire_redemptions(Utc::now() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.expired, 1);

    let transactions = engine.redemptions.list_redemptions(account.id).await.unwrap();
    assert_eq!(transactions[0].status, RedemptionStatus::Expired);
    let account = engine.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.points, 1_000);
}

// ==================== 风控与分析 ====================

#[tokio::test]
async fn test_fraud_flags_large_award_from_cancelled_booking() {
    let store = seeded_store();
    let engine = engine(&store);
    let account = funded_account(&engine, "fraud-user", 60_000).await;
    store.insert_booking(BookingSnapshot {
        status: BookingStatus::Cancelled,
        ..booking(50, "fraud-user", 1_000.0, tuesday())
    });

    let report = engine
        .fraud
        .detect_fraud(
            account.id,
            FraudCheckTransaction {
                points: 150_000,
                booking_id: Some(50),
            },
        )
        .await
        .unwrap();

    // LARGE(3) + RAPID(2) + CANCELLED(3)
    assert_eq!(report.flags.len(), 3);
    assert_eq!(report.risk_score, 8);
    assert_eq!(report.recommendation, FraudRecommendation::Review);
}

#[tokio::test]
async fn test_analytics_summarizes_flows() {
    let store = seeded_store();
    store.insert_redemption_item(item(60, 1_000));
    store.insert_perk(perk(61));
    let engine = engine(&store);
    let started = Utc::now() - Duration::minutes(1);

    let account = funded_account(&engine, "analytics-a", 3_000).await;
    funded_account(&engine, "analytics-b", 500).await;
    let receipt = engine
        .redemptions
        .process_redemption(ProcessRedemptionRequest {
            loyalty_account_id: account.id,
            item_id: 60,
            context: RedemptionContext::at(Utc::now()),
        })
        .await
        .unwrap();
    engine
        .redemptions
        .cancel_redemption(receipt.transaction.id)
        .await
        .unwrap();
    engine
        .perks
        .redeem_perk(RedeemPerkRequest {
            perk_id: 61,
            loyalty_account_id: account.id,
            booking_id: None,
        })
        .await
        .unwrap();

    let report = engine
        .analytics
        .get_advanced_analytics(started, Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.total_members, 2);
    assert_eq!(report.members_by_tier.get(&Tier::Member), Some(&2));
    assert_eq!(report.outstanding_points, 3_500);
    assert_eq!(report.points_awarded, 3_500);
    assert_eq!(report.points_redeemed, 1_000);
    assert_eq!(report.points_refunded, 1_000);
    assert_eq!(
        report.redemptions_by_status.get(&RedemptionStatus::Cancelled),
        Some(&1)
    );
    assert_eq!(report.perk_usage.len(), 1);
    assert_eq!(report.top_earners[0].account_id, account.id);
    assert_eq!(report.top_earners[0].points_earned, 3_000);

    let err = engine
        .analytics
        .get_advanced_analytics(Utc::now(), started)
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::Validation(_)));
}
