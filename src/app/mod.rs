// ==========================================
// 农户批量入驻 - 应用层
// ==========================================
// 职责: 装配各层实例，提供本地协作方实现
// ==========================================

pub mod local_services;
pub mod state;

// 重导出
pub use local_services::{
    LocalIdentityService, LoggingCredentialDispatcher, RepositoryKisanSathiAssigner,
};
pub use state::{get_default_db_path, AppState};
