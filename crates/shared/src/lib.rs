//! 共享库
//!
//! 包含积分引擎各组件共用的配置加载、数据库连接与可观测性初始化代码。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
