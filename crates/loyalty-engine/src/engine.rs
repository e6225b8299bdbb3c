//! 积分引擎装配
//!
//! 把仓储实现注入各服务，对外提供一个统一入口。
//! 同一套服务既可以跑在 PostgreSQL 上，也可以跑在内存存储上。

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::error::Result;
use crate::models::LoyaltyAccount;
use crate::repository::{
    AccountRepository, AccountRepositoryTrait, BookingDirectoryTrait, BookingRepository,
    ConfigRepository, ConfigRepositoryTrait, LedgerRepository, LedgerRepositoryTrait,
    MemoryLoyaltyStore, PerkRepository, PerkRepositoryTrait, RedemptionRepository,
    RedemptionRepositoryTrait,
};
use crate::service::{
    AnalyticsService, BookingRewardService, FraudDetector, LedgerService, PerkService,
    PointsCalculator, RedemptionService, TierService,
};
use crate::settings::EngineSettings;

/// 仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepositoryTrait>,
    pub ledger: Arc<dyn LedgerRepositoryTrait>,
    pub config: Arc<dyn ConfigRepositoryTrait>,
    pub perks: Arc<dyn PerkRepositoryTrait>,
    pub redemptions: Arc<dyn RedemptionRepositoryTrait>,
    pub bookings: Arc<dyn BookingDirectoryTrait>,
}

impl Repositories {
    /// 全部接口由同一个内存存储实现
    pub fn in_memory(store: Arc<MemoryLoyaltyStore>) -> Self {
        Self {
            accounts: store.clone(),
            ledger: store.clone(),
            config: store.clone(),
            perks: store.clone(),
            redemptions: store.clone(),
            bookings: store,
        }
    }

    /// PostgreSQL 仓储，共享同一个连接池
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            accounts: Arc::new(AccountRepository::new(pool.clone())),
            ledger: Arc::new(LedgerRepository::new(pool.clone())),
            config: Arc::new(ConfigRepository::new(pool.clone())),
            perks: Arc::new(PerkRepository::new(pool.clone())),
            redemptions: Arc::new(RedemptionRepository::new(pool.clone())),
            bookings: Arc::new(BookingRepository::new(pool)),
        }
    }
}

/// 积分引擎
pub struct LoyaltyEngine {
    accounts: Arc<dyn AccountRepositoryTrait>,
    pub tiers: Arc<TierService>,
    pub calculator: Arc<PointsCalculator>,
    pub ledger: Arc<LedgerService>,
    pub booking_rewards: Arc<BookingRewardService>,
    pub perks: Arc<PerkService>,
    pub redemptions: Arc<RedemptionService>,
    pub fraud: Arc<FraudDetector>,
    pub analytics: Arc<AnalyticsService>,
}

impl LoyaltyEngine {
    pub fn new(repos: Repositories, settings: EngineSettings) -> Self {
        let tiers = Arc::new(TierService::new(
            repos.accounts.clone(),
            repos.config.clone(),
            settings.sweep_concurrency,
        ));
        let calculator = Arc::new(PointsCalculator::new(
            repos.config.clone(),
            settings.ota_sources.clone(),
        ));
        let ledger = Arc::new(LedgerService::new(repos.ledger.clone(), tiers.clone()));
        let booking_rewards = Arc::new(BookingRewardService::new(
            repos.accounts.clone(),
            repos.ledger.clone(),
            repos.bookings.clone(),
            calculator.clone(),
            ledger.clone(),
        ));
        let perks = Arc::new(PerkService::new(
            repos.accounts.clone(),
            repos.config.clone(),
            repos.perks.clone(),
        ));
        let redemptions = Arc::new(RedemptionService::new(
            repos.accounts.clone(),
            repos.config.clone(),
            repos.redemptions.clone(),
        ));
        let fraud = Arc::new(FraudDetector::new(
            repos.accounts.clone(),
            repos.ledger.clone(),
            repos.bookings.clone(),
            settings,
        ));
        let analytics = Arc::new(AnalyticsService::new(
            repos.accounts.clone(),
            repos.ledger.clone(),
            repos.perks.clone(),
            repos.redemptions.clone(),
        ));

        info!("积分引擎服务已装配");

        Self {
            accounts: repos.accounts,
            tiers,
            calculator,
            ledger,
            booking_rewards,
            perks,
            redemptions,
            fraud,
            analytics,
        }
    }

    /// 内存存储上的引擎
    pub fn in_memory(store: Arc<MemoryLoyaltyStore>, settings: EngineSettings) -> Self {
        Self::new(Repositories::in_memory(store), settings)
    }

    /// 幂等开户
    #[instrument(skip(self))]
    pub async fn get_or_create_account(&self, user_id: &str) -> Result<LoyaltyAccount> {
        self.accounts
            .get_or_create_account(user_id, Utc::now().date_naive())
            .await
    }

    pub async fn get_account(&self, account_id: i64) -> Result<Option<LoyaltyAccount>> {
        self.accounts.get_account(account_id).await
    }
}
