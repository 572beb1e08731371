// ==========================================
// 农户批量入驻 - API 请求/响应结构
// ==========================================

use crate::domain::operation::{BulkOperation, ProcessingOptions, RetryScope};
use crate::domain::types::{
    CredentialMethod, DeduplicationMode, InputFormat, OperationStatus, ProcessingMode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// 提交
// ==========================================

/// 提交时的选项（缺省项由配置 / 原操作补齐）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    pub chunk_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub continue_on_error: Option<bool>,
    pub deduplication_mode: Option<DeduplicationMode>,
    pub assign_kisan_sathi: Option<bool>,
    pub kisan_sathi_user_id: Option<String>,
    pub send_credentials: Option<bool>,
    pub credential_method: Option<CredentialMethod>,
}

impl SubmitOptions {
    /// 以 base 为底，覆盖显式给出的项
    pub fn resolve(&self, base: &ProcessingOptions) -> ProcessingOptions {
        ProcessingOptions {
            chunk_size: self.chunk_size.unwrap_or(base.chunk_size),
            max_concurrency: self.max_concurrency.unwrap_or(base.max_concurrency),
            continue_on_error: self.continue_on_error.unwrap_or(base.continue_on_error),
            deduplication_mode: self.deduplication_mode.unwrap_or(base.deduplication_mode),
            assign_kisan_sathi: self.assign_kisan_sathi.unwrap_or(base.assign_kisan_sathi),
            kisan_sathi_user_id: self
                .kisan_sathi_user_id
                .clone()
                .or_else(|| base.kisan_sathi_user_id.clone()),
            send_credentials: self.send_credentials.unwrap_or(base.send_credentials),
            credential_method: self.credential_method.unwrap_or(base.credential_method),
        }
    }
}

/// 提交请求（文件内容另行传入）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub org_id: String,
    #[serde(default)]
    pub input_format: Option<InputFormat>,
    #[serde(default)]
    pub file_name: Option<String>, // 未给 input_format 时按扩展名推断
    #[serde(default)]
    pub processing_mode: ProcessingMode,
    #[serde(default)]
    pub options: SubmitOptions,
}

/// 提交响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub operation_id: String,
    pub status: OperationStatus,
    pub total_records: usize,
    pub status_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
}

// ==========================================
// 状态查询
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub operation_id: String,
    pub org_id: String,
    pub parent_operation_id: Option<String>,
    pub status: OperationStatus,
    pub progress: ProgressView,
    pub current_batch: usize,
    pub total_batches: usize,
    pub error_summary: Option<String>,
    pub can_retry: bool,
    pub cancellation_requested: bool,
    pub result_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&BulkOperation> for StatusResponse {
    fn from(op: &BulkOperation) -> Self {
        Self {
            operation_id: op.id.clone(),
            org_id: op.org_id.clone(),
            parent_operation_id: op.parent_operation_id.clone(),
            status: op.status,
            progress: ProgressView {
                total: op.total_records,
                processed: op.processed_records,
                successful: op.successful_records,
                failed: op.failed_records,
                skipped: op.skipped_records,
                percentage: op.progress_percentage,
            },
            current_batch: op.current_batch,
            total_batches: op.total_batches,
            error_summary: op.error_summary.clone(),
            can_retry: op.can_retry,
            cancellation_requested: op.cancellation_requested,
            result_url: op.result_file_url.clone(),
            created_at: op.created_at,
            start_time: op.start_time,
            end_time: op.end_time,
        }
    }
}

// ==========================================
// 重试
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRequest {
    pub operation_id: String,
    #[serde(default)]
    pub retry_all: bool,
    #[serde(default)]
    pub record_indices: Option<Vec<usize>>,
    #[serde(default)]
    pub options: Option<SubmitOptions>,
}

impl RetryRequest {
    /// retry_all → 全部；record_indices → 指定下标；否则失败记录
    pub fn scope(&self) -> RetryScope {
        if self.retry_all {
            RetryScope::All
        } else if let Some(indices) = &self.record_indices {
            RetryScope::Indices(indices.clone())
        } else {
            RetryScope::FailedOnly
        }
    }
}

// ==========================================
// 模板
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub example: String,
}
