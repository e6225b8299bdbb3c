//! 积分风控
//!
//! 基于账本与预订历史的只读评分，结果仅供参考，不拦截也不冲正任何交易。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use loyalty_shared::observability::metrics as loyalty_metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{BookingStatus, FraudRecommendation, FraudSeverity};
use crate::repository::{AccountRepositoryTrait, BookingDirectoryTrait, LedgerRepositoryTrait};
use crate::service::dto::{FraudCheckTransaction, FraudFlag, FraudFlagKind, FraudReport};
use crate::settings::EngineSettings;

/// 风险分 = 各标记权重之和
pub fn risk_score(flags: &[FraudFlag]) -> u32 {
    flags.iter().map(|f| f.severity.weight()).sum()
}

/// 积分风控检测
pub struct FraudDetector {
    accounts: Arc<dyn AccountRepositoryTrait>,
    ledger: Arc<dyn LedgerRepositoryTrait>,
    bookings: Arc<dyn BookingDirectoryTrait>,
    settings: EngineSettings,
}

impl FraudDetector {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        ledger: Arc<dyn LedgerRepositoryTrait>,
        bookings: Arc<dyn BookingDirectoryTrait>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            accounts,
            ledger,
            bookings,
            settings,
        }
    }

    /// 评估一笔积分交易的风险
    #[instrument(skip(self))]
    pub async fn detect_fraud(
        &self,
        account_id: i64,
        transaction: FraudCheckTransaction,
    ) -> Result<FraudReport> {
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| LoyaltyError::AccountNotFound(account_id.to_string()))?;
        let now = Utc::now();
        let mut flags = Vec::new();

        if transaction.points > self.settings.large_award_threshold {
            flags.push(FraudFlag {
                flag: FraudFlagKind::LargePointsAward,
                severity: FraudSeverity::High,
                detail: format!("单笔积分 {}", transaction.points),
            });
        }

        let recent: i64 = self
            .ledger
            .list_entries_since(account_id, now - self.settings.rapid_window)
            .await?
            .iter()
            .filter(|e| e.points > 0)
            .map(|e| e.points)
            .sum();
        if recent > self.settings.rapid_accumulation_threshold {
            flags.push(FraudFlag {
                flag: FraudFlagKind::RapidAccumulation,
                severity: FraudSeverity::Medium,
                detail: format!("窗口内累计入账 {}", recent),
            });
        }

        let bookings = self
            .bookings
            .count_user_bookings_since(&account.user_id, now - self.settings.booking_window)
            .await?;
        if bookings > self.settings.excessive_bookings_threshold {
            flags.push(FraudFlag {
                flag: FraudFlagKind::ExcessiveBookings,
                severity: FraudSeverity::Medium,
                detail: format!("窗口内预订 {} 次", bookings),
            });
        }

        if let Some(booking_id) = transaction.booking_id {
            let cancelled = self
                .bookings
                .get_booking(booking_id)
                .await?
                .is_some_and(|b| b.status == BookingStatus::Cancelled);
            if cancelled {
                flags.push(FraudFlag {
                    flag: FraudFlagKind::PointsFromCancelled,
                    severity: FraudSeverity::High,
                    detail: format!("预订 {} 已取消", booking_id),
                });
            }
        }

        for flag in &flags {
            loyalty_metrics::record_fraud_flag(flag.flag.as_str(), flag.severity.as_str());
        }

        let risk_score = risk_score(&flags);
        let recommendation = FraudRecommendation::from_score(risk_score);
        if !flags.is_empty() {
            info!(
                account_id,
                risk_score,
                flags = flags.len(),
                recommendation = ?recommendation,
                "风控检测命中"
            );
        }

        Ok(FraudReport {
            account_id,
            flags,
            risk_score,
            recommendation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BookingSnapshot, BookingSource, LedgerReason, LedgerReferences, LoyaltyAccount,
        PointsLedgerEntry,
    };
    use crate::repository::{
        MockAccountRepositoryTrait, MockBookingDirectoryTrait, MockLedgerRepositoryTrait,
    };

    fn entry(points: i64) -> PointsLedgerEntry {
        PointsLedgerEntry {
            id: 1,
            account_id: 1,
            points,
            reason: LedgerReason::Bonus,
            description: None,
            balance_before: 0,
            balance_after: points.max(0),
            references: LedgerReferences::default(),
            created_at: Utc::now(),
        }
    }

    fn cancelled_booking(booking_id: i64) -> BookingSnapshot {
        let now = Utc::now();
        BookingSnapshot {
            booking_id,
            user_id: "user-1".to_string(),
            room_revenue: 100.0,
            add_on_revenue: 0.0,
            check_in: now,
            check_out: now,
            source: BookingSource::Direct,
            property_id: 1,
            room_type_id: None,
            is_prepaid: false,
            room_type_category: None,
            confirmation_number: "CONF-1".to_string(),
            status: BookingStatus::Cancelled,
            created_at: now,
        }
    }

    fn detector(recent: Vec<i64>, bookings: i64) -> FraudDetector {
        let mut accounts = MockAccountRepositoryTrait::new();
        accounts.expect_get_account().returning(|id| {
            Ok(Some(LoyaltyAccount::new(
                id,
                "user-1",
                Utc::now().date_naive(),
            )))
        });
        let mut ledger = MockLedgerRepositoryTrait::new();
        ledger
            .expect_list_entries_since()
            .returning(move |_, _| Ok(recent.iter().copied().map(entry).collect()));
        let mut directory = MockBookingDirectoryTrait::new();
        directory
            .expect_count_user_bookings_since()
            .returning(move |_, _| Ok(bookings));
        directory
            .expect_get_booking()
            .returning(|id| Ok(Some(cancelled_booking(id))));

        FraudDetector::new(
            Arc::new(accounts),
            Arc::new(ledger),
            Arc::new(directory),
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_clean_transaction() {
        let report = detector(vec![1_000], 2)
            .detect_fraud(
                1,
                FraudCheckTransaction {
                    points: 500,
                    booking_id: None,
                },
            )
            .await
            .unwrap();
        assert!(report.flags.is_empty());
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.recommendation, FraudRecommendation::Ok);
    }

    #[tokio::test]
    async fn test_large_award_from_cancelled_booking() {
        let report = detector(Vec::new(), 0)
            .detect_fraud(
                1,
                FraudCheckTransaction {
                    points: 150_000,
                    booking_id: Some(42),
                },
            )
            .await
            .unwrap();
        assert_eq!(report.flags.len(), 2);
        assert_eq!(report.risk_score, 6);
        assert_eq!(report.recommendation, FraudRecommendation::Review);
    }

    #[tokio::test]
    async fn test_rapid_accumulation_ignores_debits() {
        let report = detector(vec![30_000, 25_000, -40_000], 11)
            .detect_fraud(
                1,
                FraudCheckTransaction {
                    points: 10,
                    booking_id: None,
                },
            )
            .await
            .unwrap();
        let kinds: Vec<_> = report.flags.iter().map(|f| f.flag).collect();
        assert_eq!(
            kinds,
            vec![FraudFlagKind::RapidAccumulation, FraudFlagKind::ExcessiveBookings]
        );
        assert_eq!(report.risk_score, 4);
        assert_eq!(report.recommendation, FraudRecommendation::Monitor);
    }
}
