// ==========================================
// 农户批量入驻 - API层错误类型
// ==========================================
// 职责: 汇总导入 / 引擎 / 仓储 / 配置错误，转换为带稳定错误码的对外错误
// ==========================================

use crate::config::error::ConfigError;
use crate::engine::error::EngineError;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 请求错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("状态冲突: {0}")]
    Conflict(String),

    // ==========================================
    // 导入错误（解析 / 预检，同步返回）
    // ==========================================
    #[error("文件导入失败: {0}")]
    Import(#[from] ImportError),

    // ==========================================
    // 基础设施错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 稳定的机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Import(e) => e.code(),
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ConfigError(_) => "CONFIG_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Conflict(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InternalError(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::OperationNotFound(id) => {
                ApiError::NotFound(format!("批量操作(id={})不存在", id))
            }
            e @ (EngineError::InvalidTransition { .. }
            | EngineError::OperationNotTerminal(_)
            | EngineError::WorkSetUnavailable(_)) => ApiError::Conflict(e.to_string()),
            e @ (EngineError::NothingToRetry(_) | EngineError::UnknownRecordIndices { .. }) => {
                ApiError::InvalidInput(e.to_string())
            }
            EngineError::LockPoisoned(msg) => ApiError::InternalError(msg),
            EngineError::Repository(e) => e.into(),
        }
    }
}

// ==========================================
// 从 ConfigError 转换
// ==========================================
impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::InvalidInput("x".into()).code(), "INVALID_INPUT");
        assert_eq!(
            ApiError::from(ImportError::MissingRequiredHeaders(vec!["phone_number".into()])).code(),
            "MISSING_HEADERS"
        );
        assert_eq!(
            ApiError::from(EngineError::OperationNotFound("op".into())).code(),
            "NOT_FOUND"
        );
        assert_eq!(
            ApiError::from(EngineError::OperationNotTerminal("op".into())).code(),
            "CONFLICT"
        );
        assert_eq!(
            ApiError::from(EngineError::UnknownRecordIndices { indices: vec![7] }).code(),
            "INVALID_INPUT"
        );
    }
}
