// ==========================================
// 农户批量入驻 - 领域类型定义
// ==========================================
// 职责: 批量操作 / 处理明细 / 处理选项所用的枚举
// 序列化格式: 与数据库、API 一致（状态类大写，输入类小写）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 批量操作状态 (Operation Status)
// ==========================================
// 红线: 状态单调推进，终态不可再变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Queued,     // 已提交，未开始
    Processing, // 执行中
    Completed,  // 已完成（允许部分记录失败）
    Failed,     // 因 continue_on_error=false 中止
    Cancelled,  // 已取消
}

impl OperationStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// 状态迁移是否合法
    ///
    /// QUEUED → PROCESSING | CANCELLED
    /// PROCESSING → COMPLETED | FAILED | CANCELLED
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "QUEUED",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Cancelled => "CANCELLED",
        }
    }

    /// 从数据库字符串解析（未知值视为 FAILED）
    pub fn from_db_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "QUEUED" => OperationStatus::Queued,
            "PROCESSING" => OperationStatus::Processing,
            "COMPLETED" => OperationStatus::Completed,
            "CANCELLED" => OperationStatus::Cancelled,
            _ => OperationStatus::Failed,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 输入格式 (Input Format)
// ==========================================
// 同时用作结果报表的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Csv,
    Excel,
    Json,
}

impl InputFormat {
    /// 根据文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(InputFormat::Csv),
            "xlsx" | "xls" | "xlsm" | "ods" => Some(InputFormat::Excel),
            "json" => Some(InputFormat::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Csv => "csv",
            InputFormat::Excel => "excel",
            InputFormat::Json => "json",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(InputFormat::Csv),
            "excel" | "xlsx" | "xls" => Ok(InputFormat::Excel),
            "json" => Ok(InputFormat::Json),
            other => Err(format!("unsupported input format: {}", other)),
        }
    }
}

// ==========================================
// 处理模式 (Processing Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Sync,    // 提交方等待执行完成
    #[default]
    Async,   // 后台执行，立即返回
    Batch,   // 后台执行（大批量），立即返回
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Sync => "sync",
            ProcessingMode::Async => "async",
            ProcessingMode::Batch => "batch",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sync" => Ok(ProcessingMode::Sync),
            "async" => Ok(ProcessingMode::Async),
            "batch" => Ok(ProcessingMode::Batch),
            other => Err(format!("unsupported processing mode: {}", other)),
        }
    }
}

// ==========================================
// 去重策略 (Deduplication Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeduplicationMode {
    #[default]
    Skip,   // 已存在 → SKIPPED，不做修改
    Update, // 已存在 → 走更新路径
    Error,  // 已存在 → FAILED / DUPLICATE
}

impl DeduplicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeduplicationMode::Skip => "skip",
            DeduplicationMode::Update => "update",
            DeduplicationMode::Error => "error",
        }
    }
}

impl fmt::Display for DeduplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeduplicationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(DeduplicationMode::Skip),
            "update" => Ok(DeduplicationMode::Update),
            "error" => Ok(DeduplicationMode::Error),
            other => Err(format!("unsupported deduplication mode: {}", other)),
        }
    }
}

// ==========================================
// 凭据下发方式 (Credential Method)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMethod {
    #[default]
    Sms,
    Email,
    Both,
}

impl CredentialMethod {
    pub fn includes_sms(&self) -> bool {
        matches!(self, CredentialMethod::Sms | CredentialMethod::Both)
    }

    pub fn includes_email(&self) -> bool {
        matches!(self, CredentialMethod::Email | CredentialMethod::Both)
    }
}

impl fmt::Display for CredentialMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialMethod::Sms => write!(f, "sms"),
            CredentialMethod::Email => write!(f, "email"),
            CredentialMethod::Both => write!(f, "both"),
        }
    }
}

impl FromStr for CredentialMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sms" => Ok(CredentialMethod::Sms),
            "email" => Ok(CredentialMethod::Email),
            "both" => Ok(CredentialMethod::Both),
            other => Err(format!("unsupported credential method: {}", other)),
        }
    }
}

// ==========================================
// 记录处理结果 (Detail Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailStatus {
    Success,
    Failed,
    Skipped,
}

impl DetailStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            DetailStatus::Success => "SUCCESS",
            DetailStatus::Failed => "FAILED",
            DetailStatus::Skipped => "SKIPPED",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "SUCCESS" => DetailStatus::Success,
            "SKIPPED" => DetailStatus::Skipped,
            _ => DetailStatus::Failed,
        }
    }
}

impl fmt::Display for DetailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 记录动作 (Record Action)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordAction {
    Created,
    Updated,
}

impl RecordAction {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            RecordAction::Created => "CREATED",
            RecordAction::Updated => "UPDATED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(RecordAction::Created),
            "UPDATED" => Some(RecordAction::Updated),
            _ => None,
        }
    }
}

// ==========================================
// 记录错误码 (Error Code)
// ==========================================
// 用于错误直方图与结果报表
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,         // 记录校验未通过
    Duplicate,          // 去重策略 error 命中
    IdentityFailed,     // 身份服务解析/创建失败
    FarmerCreateFailed, // 农户实体创建失败
    FarmerUpdateFailed, // 农户实体更新失败
    LookupFailed,       // 去重查询失败
    Timeout,            // 外部调用超时
    Internal,           // 工作协程异常
}

impl ErrorCode {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::IdentityFailed => "IDENTITY_FAILED",
            ErrorCode::FarmerCreateFailed => "FARMER_CREATE_FAILED",
            ErrorCode::FarmerUpdateFailed => "FARMER_UPDATE_FAILED",
            ErrorCode::LookupFailed => "LOOKUP_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "VALIDATION" => Some(ErrorCode::Validation),
            "DUPLICATE" => Some(ErrorCode::Duplicate),
            "IDENTITY_FAILED" => Some(ErrorCode::IdentityFailed),
            "FARMER_CREATE_FAILED" => Some(ErrorCode::FarmerCreateFailed),
            "FARMER_UPDATE_FAILED" => Some(ErrorCode::FarmerUpdateFailed),
            "LOOKUP_FAILED" => Some(ErrorCode::LookupFailed),
            "TIMEOUT" => Some(ErrorCode::Timeout),
            "INTERNAL" => Some(ErrorCode::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use OperationStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Queued));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&OperationStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let mode: DeduplicationMode = serde_json::from_str("\"update\"").unwrap();
        assert_eq!(mode, DeduplicationMode::Update);
    }

    #[test]
    fn test_input_format_parse() {
        assert_eq!("CSV".parse::<InputFormat>().unwrap(), InputFormat::Csv);
        assert_eq!(InputFormat::from_extension("xlsx"), Some(InputFormat::Excel));
        assert!("xml".parse::<InputFormat>().is_err());
    }
}
