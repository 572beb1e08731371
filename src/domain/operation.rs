// ==========================================
// 农户批量入驻 - 批量操作领域模型
// ==========================================
// 职责: 批量操作 / 处理选项 / 校验结果 / 处理明细
// 不变量: processed = successful + failed + skipped
// ==========================================

use crate::domain::farmer::NormalizedFarmerRecord;
use crate::domain::types::{
    CredentialMethod, DeduplicationMode, DetailStatus, ErrorCode, InputFormat, OperationStatus,
    ProcessingMode, RecordAction,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

// ==========================================
// ProcessingOptions - 处理选项
// ==========================================
// 用途: 单个批量操作的不可变配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub continue_on_error: bool,
    pub deduplication_mode: DeduplicationMode,
    pub assign_kisan_sathi: bool,
    pub kisan_sathi_user_id: Option<String>,
    pub send_credentials: bool,
    pub credential_method: CredentialMethod,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            continue_on_error: true,
            deduplication_mode: DeduplicationMode::Skip,
            assign_kisan_sathi: false,
            kisan_sathi_user_id: None,
            send_credentials: false,
            credential_method: CredentialMethod::Sms,
        }
    }
}

impl ProcessingOptions {
    /// 校验选项取值范围
    ///
    /// # 返回
    /// - Ok(()): 合法
    /// - Err(String): 第一个不合法项的说明
    pub fn check(&self, max_chunk_size: usize, max_concurrency_limit: usize) -> Result<(), String> {
        if self.chunk_size == 0 || self.chunk_size > max_chunk_size {
            return Err(format!(
                "chunk_size must be between 1 and {}, got {}",
                max_chunk_size, self.chunk_size
            ));
        }
        if self.max_concurrency == 0 || self.max_concurrency > max_concurrency_limit {
            return Err(format!(
                "max_concurrency must be between 1 and {}, got {}",
                max_concurrency_limit, self.max_concurrency
            ));
        }
        if self.assign_kisan_sathi
            && self
                .kisan_sathi_user_id
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err("kisan_sathi_user_id is required when assign_kisan_sathi is set".to_string());
        }
        Ok(())
    }
}

// ==========================================
// ValidationOutcome - 单条记录校验结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ==========================================
// AncillaryOutcome - 附属动作结果
// ==========================================
// 用途: 代理人分配 / 凭据下发，失败不翻转 SUCCESS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncillaryOutcome {
    pub attempted: bool,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl AncillaryOutcome {
    pub fn not_attempted() -> Self {
        Self::default()
    }

    pub fn succeeded() -> Self {
        Self {
            attempted: true,
            succeeded: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            attempted: true,
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

// ==========================================
// ProcessingDetail - 单条记录处理明细
// ==========================================
// 红线: 追加写，每条记录一份
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingDetail {
    pub record_index: usize,
    pub external_id: Option<String>,
    pub status: DetailStatus,
    pub action: Option<RecordAction>,
    pub farmer_id: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub processed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub kisan_sathi: AncillaryOutcome,
    pub credentials: AncillaryOutcome,
}

impl ProcessingDetail {
    pub fn success(
        record_index: usize,
        external_id: Option<String>,
        farmer_id: String,
        action: RecordAction,
        retry_count: u32,
    ) -> Self {
        Self {
            record_index,
            external_id,
            status: DetailStatus::Success,
            action: Some(action),
            farmer_id: Some(farmer_id),
            error: None,
            error_code: None,
            processed_at: Utc::now(),
            retry_count,
            kisan_sathi: AncillaryOutcome::not_attempted(),
            credentials: AncillaryOutcome::not_attempted(),
        }
    }

    pub fn failed(
        record_index: usize,
        external_id: Option<String>,
        code: ErrorCode,
        error: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            record_index,
            external_id,
            status: DetailStatus::Failed,
            action: None,
            farmer_id: None,
            error: Some(error.into()),
            error_code: Some(code),
            processed_at: Utc::now(),
            retry_count,
            kisan_sathi: AncillaryOutcome::not_attempted(),
            credentials: AncillaryOutcome::not_attempted(),
        }
    }

    pub fn skipped(
        record_index: usize,
        external_id: Option<String>,
        farmer_id: Option<String>,
        reason: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            record_index,
            external_id,
            status: DetailStatus::Skipped,
            action: None,
            farmer_id,
            error: Some(reason.into()),
            error_code: None,
            processed_at: Utc::now(),
            retry_count,
            kisan_sathi: AncillaryOutcome::not_attempted(),
            credentials: AncillaryOutcome::not_attempted(),
        }
    }
}

// ==========================================
// BulkOperation - 批量操作
// ==========================================
// 用途: 一次提交对应一个操作，仅由其调度任务修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: String,
    pub org_id: String,
    pub parent_operation_id: Option<String>, // 重试派生时指向原操作
    pub status: OperationStatus,
    pub input_format: InputFormat,
    pub processing_mode: ProcessingMode,
    pub options: ProcessingOptions,

    // ===== 进度计数 =====
    pub total_records: usize,
    pub processed_records: usize,
    pub successful_records: usize,
    pub failed_records: usize,
    pub skipped_records: usize,
    pub progress_percentage: f64,
    pub current_batch: usize,
    pub total_batches: usize,

    // ===== 时间 =====
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    // ===== 结果 =====
    pub error_summary: Option<String>,
    pub result_file_url: Option<String>,
    pub can_retry: bool,
    pub cancellation_requested: bool,
}

impl BulkOperation {
    /// 按当前计数重算进度百分比（两位小数）
    pub fn recompute_progress(&mut self) {
        self.progress_percentage = if self.total_records == 0 {
            100.0
        } else {
            let raw = self.processed_records as f64 * 100.0 / self.total_records as f64;
            (raw * 100.0).round() / 100.0
        };
    }

    /// 计数不变量
    pub fn counters_consistent(&self) -> bool {
        self.processed_records
            == self.successful_records + self.failed_records + self.skipped_records
    }
}

/// 计算分块数量: ceil(total / chunk_size)
pub fn total_batches(total_records: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    total_records.div_ceil(chunk_size)
}

// ==========================================
// WorkEntry / OperationWorkSet - 物化记录集
// ==========================================
// 用途: 操作生命周期内保存的不可变记录集（按 record_index 取用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkEntry {
    pub record: NormalizedFarmerRecord, // 校验通过时已补全默认值
    pub validation: ValidationOutcome,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationWorkSet {
    pub org_id: String,
    pub input_format: InputFormat,
    pub processing_mode: ProcessingMode,
    pub options: ProcessingOptions,
    pub entries: Vec<WorkEntry>,
}

// ==========================================
// RetryScope - 重试范围
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    FailedOnly,          // 失败 + 未派发的记录
    All,                 // 全部记录
    Indices(Vec<usize>), // 指定下标
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_batches() {
        assert_eq!(total_batches(0, 100), 0);
        assert_eq!(total_batches(1, 100), 1);
        assert_eq!(total_batches(100, 100), 1);
        assert_eq!(total_batches(101, 100), 2);
        assert_eq!(total_batches(250, 100), 3);
    }

    #[test]
    fn test_options_check() {
        let options = ProcessingOptions::default();
        assert!(options.check(1000, 50).is_ok());

        let bad = ProcessingOptions {
            max_concurrency: 0,
            ..ProcessingOptions::default()
        };
        assert!(bad.check(1000, 50).unwrap_err().contains("max_concurrency"));

        let missing_agent = ProcessingOptions {
            assign_kisan_sathi: true,
            ..ProcessingOptions::default()
        };
        assert!(missing_agent.check(1000, 50).is_err());
    }

    #[test]
    fn test_options_defaults_from_partial_json() {
        let options: ProcessingOptions =
            serde_json::from_str(r#"{"chunk_size": 20, "deduplication_mode": "error"}"#).unwrap();
        assert_eq!(options.chunk_size, 20);
        assert_eq!(options.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(options.continue_on_error);
        assert_eq!(options.deduplication_mode, DeduplicationMode::Error);
    }
}
