//! 每日重新定级 Worker
//!
//! 按 cron 表达式计算下次触发时间，休眠到点后依次执行：
//! 1. 重新定级（资格年度到期的会员）
//! 2. 兑换过期处理
//!
//! 单次执行失败只记录日志，不退出循环。

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{error, info, warn};

use loyalty_shared::observability::metrics as loyalty_metrics;

use crate::error::{LoyaltyError, Result};
use crate::service::{ExpirySummary, RedemptionService, RequalificationSummary, TierService};

const WORKER_NAME: &str = "requalification_worker";

/// 单次执行结果
#[derive(Debug, Default)]
pub struct RunReport {
    pub requalification: Option<RequalificationSummary>,
    pub expiry: Option<ExpirySummary>,
}

/// 重新定级 Worker
pub struct RequalificationWorker {
    tiers: Arc<TierService>,
    redemptions: Arc<RedemptionService>,
    schedule: Schedule,
}

impl RequalificationWorker {
    pub fn new(
        tiers: Arc<TierService>,
        redemptions: Arc<RedemptionService>,
        cron_expression: &str,
    ) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            LoyaltyError::Validation(format!("无效的 cron 表达式 {}: {}", cron_expression, e))
        })?;
        Ok(Self {
            tiers,
            redemptions,
            schedule,
        })
    }

    /// `after` 之后的下一次触发时间
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// 主循环：持续调度直到进程退出
    pub async fn run(&self) {
        info!("RequalificationWorker 已启动");
        loop {
            let now = Utc::now();
            let Some(next) = self.next_run_after(now) else {
                warn!("cron 表达式没有后续触发时间，Worker 退出");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "等待下次重新定级");
            tokio::time::sleep(wait).await;

            self.run_once(Utc::now()).await;
        }
    }

    /// 执行一次重新定级与过期处理
    pub async fn run_once(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();

        match self
            .tiers
            .process_tier_requalification(now.date_naive())
            .await
        {
            Ok(summary) => report.requalification = Some(summary),
            Err(e) => error!(error = %e, "重新定级执行失败"),
        }

        match self.redemptions.expire_redemptions(now).await {
            Ok(summary) => report.expiry = Some(summary),
            Err(e) => error!(error = %e, "兑换过期处理失败"),
        }

        // 记录 Worker 健康状态，供 Prometheus 告警判断 Worker 是否存活
        loyalty_metrics::set_worker_last_run(WORKER_NAME);
        report
    }
}
