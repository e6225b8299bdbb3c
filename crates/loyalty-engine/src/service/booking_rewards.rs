//! 预订完成入账
//!
//! 预订完成时由外部系统调用：开户（幂等）-> 计算积分 -> 入账并累加住宿指标。
//! 每笔预订的 BOOKING_STAY 流水至多一条，重复调用返回首次入账的流水。
//! 积分为 0（如 OTA 渠道）时仍写入一条 0 分流水，保证住宿指标只累加一次。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use loyalty_shared::observability::metrics as loyalty_metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{
    BookingSnapshot, LedgerReason, LedgerReferences, PointsLedgerEntry, PointsMutation, StayDelta,
};
use crate::repository::{AccountRepositoryTrait, BookingDirectoryTrait, LedgerRepositoryTrait};
use crate::service::dto::{BookingAward, CalculatePointsParams};
use crate::service::ledger_service::LedgerService;
use crate::service::points_calculator::PointsCalculator;

/// 预订入账服务
pub struct BookingRewardService {
    accounts: Arc<dyn AccountRepositoryTrait>,
    ledger: Arc<dyn LedgerRepositoryTrait>,
    bookings: Arc<dyn BookingDirectoryTrait>,
    calculator: Arc<PointsCalculator>,
    ledger_service: Arc<LedgerService>,
}

impl BookingRewardService {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        ledger: Arc<dyn LedgerRepositoryTrait>,
        bookings: Arc<dyn BookingDirectoryTrait>,
        calculator: Arc<PointsCalculator>,
        ledger_service: Arc<LedgerService>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            bookings,
            calculator,
            ledger_service,
        }
    }

    /// 按预订 ID 入账
    #[instrument(skip(self))]
    pub async fn award_points_for_booking_id(&self, booking_id: i64) -> Result<BookingAward> {
        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(LoyaltyError::BookingNotFound(booking_id))?;
        self.award_points_for_booking(&booking).await
    }

    /// 预订完成入账
    #[instrument(skip(self, booking), fields(booking_id = booking.booking_id, user_id = %booking.user_id))]
    pub async fn award_points_for_booking(&self, booking: &BookingSnapshot) -> Result<BookingAward> {
        let account = self
            .accounts
            .get_or_create_account(&booking.user_id, Utc::now().date_naive())
            .await?;

        if let Some(entry) = self.existing_award(booking.booking_id).await? {
            info!(entry_id = entry.id, "预订积分已发放，跳过");
            return Ok(BookingAward::AlreadyAwarded { entry });
        }

        let calculation = self
            .calculator
            .calculate_points(&CalculatePointsParams::from_booking(booking, account.tier))
            .await?;

        let mutation = PointsMutation {
            account_id: account.id,
            delta: calculation.total_points,
            reason: LedgerReason::BookingStay,
            description: Some(format!("预订 {} 住宿积分", booking.confirmation_number)),
            references: LedgerReferences {
                booking_id: Some(booking.booking_id),
                rule_ids: calculation.rule_ids(),
                campaign_ids: calculation.campaign_ids(),
                ..Default::default()
            },
            stay: Some(StayDelta {
                stays: 1,
                nights: calculation.stay_length,
                spend: booking.total_revenue(),
            }),
            unique_per_booking: true,
        };

        let entry = match self.ledger.apply_points(mutation).await {
            Ok(entry) => entry,
            // 并发重复调用：另一请求已入账
            Err(LoyaltyError::DuplicateAward(booking_id)) => {
                let entry = self
                    .existing_award(booking_id)
                    .await?
                    .ok_or(LoyaltyError::DuplicateAward(booking_id))?;
                return Ok(BookingAward::AlreadyAwarded { entry });
            }
            Err(e) => return Err(e),
        };

        if entry.points > 0 {
            loyalty_metrics::record_points_awarded(entry.reason.as_str(), entry.points);
        }
        info!(
            account_id = account.id,
            points = entry.points,
            balance_after = entry.balance_after,
            "预订积分入账成功"
        );

        let tier_change = self.ledger_service.upgrade_after_award(account.id).await;

        Ok(BookingAward::Awarded {
            entry,
            calculation,
            tier_change,
        })
    }

    async fn existing_award(&self, booking_id: i64) -> Result<Option<PointsLedgerEntry>> {
        self.ledger
            .find_booking_entry(booking_id, LedgerReason::BookingStay)
            .await
    }
}
