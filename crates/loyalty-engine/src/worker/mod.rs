//! 后台任务
//!
//! - `requalification`: 按 cron 周期执行重新定级与兑换过期处理

pub mod requalification;

pub use requalification::RequalificationWorker;
