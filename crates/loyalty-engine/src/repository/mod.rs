//! 数据仓储层
//!
//! 提供所有实体的数据访问接口，封装存储细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 需要原子性的读改写序列（积分变动、权益领取、兑换提交、兑换取消、定级变更）
//!   收敛为单个仓储调用，事务边界由仓储实现负责
//! - 定义 trait 接口以支持 mock 测试与内存实现
//!
//! ## 实现
//!
//! - PostgreSQL：每个实体一个仓储，使用 SQLx 行锁与条件更新
//! - 内存：`MemoryLoyaltyStore` 单结构实现全部接口，适用于测试和本地运行

mod account_repo;
mod booking_repo;
mod config_repo;
mod ledger_repo;
mod memory_store;
mod perk_repo;
mod redemption_repo;
mod traits;

pub use account_repo::AccountRepository;
pub use booking_repo::BookingRepository;
pub use config_repo::ConfigRepository;
pub use ledger_repo::LedgerRepository;
pub use memory_store::MemoryLoyaltyStore;
pub use perk_repo::PerkRepository;
pub use redemption_repo::RedemptionRepository;
pub use traits::*;
