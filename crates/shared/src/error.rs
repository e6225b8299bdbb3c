//! 基础设施错误类型
//!
//! 仅覆盖共享层（数据库连接、配置加载）的错误，业务错误由各服务自行定义。

use thiserror::Error;

/// 共享层错误
#[derive(Debug, Error)]
pub enum SharedError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),
}

/// 共享层 Result 类型别名
pub type Result<T> = std::result::Result<T, SharedError>;
