// ==========================================
// 农户批量入驻 - 配置层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 配置层错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置库锁获取失败: {0}")]
    LockError(String),

    #[error("配置读取失败: {0}")]
    DatabaseError(String),

    #[error("配置值非法 (key={key}): {value}")]
    InvalidValue { key: String, value: String },
}

impl From<rusqlite::Error> for ConfigError {
    fn from(err: rusqlite::Error) -> Self {
        ConfigError::DatabaseError(err.to_string())
    }
}

/// Result 类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
