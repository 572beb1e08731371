// ==========================================
// 农户批量入驻 - 配置层
// ==========================================
// 职责: 批量管道配置读取，缺省值兜底
// 存储: config_kv 表
// ==========================================

pub mod bulk_config_trait;
pub mod config_manager;
pub mod error;

// 重导出核心配置管理器
pub use bulk_config_trait::{BulkConfig, BulkConfigReader};
pub use config_manager::{config_keys, ConfigManager};
pub use error::{ConfigError, ConfigResult};
