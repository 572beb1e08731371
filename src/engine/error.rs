// ==========================================
// 农户批量入驻 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 单条记录失败写入明细，不走此类型
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型（追踪器 / 调度器）
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("批量操作不存在: {0}")]
    OperationNotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition { from: String, to: String },

    #[error("批量操作尚未结束，不能重试: {0}")]
    OperationNotTerminal(String),

    #[error("没有可重试的记录: {0}")]
    NothingToRetry(String),

    #[error("未知的记录下标: {indices:?}")]
    UnknownRecordIndices { indices: Vec<usize> },

    #[error("批量操作的记录集已释放，无法重试: {0}")]
    WorkSetUnavailable(String),

    #[error("状态锁已中毒: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
