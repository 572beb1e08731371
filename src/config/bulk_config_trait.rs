// ==========================================
// 农户批量入驻 - 批量配置读取 Trait
// ==========================================
// 职责: 定义批量管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::error::ConfigResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ==========================================
// BulkConfig - 批量管道配置快照
// ==========================================
// 用途: 提交时读取一次，整个操作期间不变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    pub max_records: usize,
    pub max_upload_bytes: usize,
    pub default_chunk_size: usize,
    pub default_max_concurrency: usize,
    pub max_chunk_size: usize,
    pub max_concurrency_limit: usize,
    pub call_timeout_ms: u64,
    pub estimated_ms_per_record: u64,
    pub api_base_path: String,
    pub retained_operations: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            max_upload_bytes: 10 * 1024 * 1024,
            default_chunk_size: 100,
            default_max_concurrency: 10,
            max_chunk_size: 1_000,
            max_concurrency_limit: 50,
            call_timeout_ms: 30_000,
            estimated_ms_per_record: 250,
            api_base_path: "/api/v1/bulk".to_string(),
            retained_operations: 100,
        }
    }
}

// ==========================================
// BulkConfigReader Trait
// ==========================================
// 用途: 批量管道所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）, BulkConfig（内存）
#[async_trait]
pub trait BulkConfigReader: Send + Sync {
    /// 单次上传的最大记录数
    ///
    /// # 默认值
    /// - 10000
    async fn get_max_records(&self) -> ConfigResult<usize>;

    /// 单次上传的最大字节数
    ///
    /// # 默认值
    /// - 10485760（10 MiB）
    async fn get_max_upload_bytes(&self) -> ConfigResult<usize>;

    async fn get_default_chunk_size(&self) -> ConfigResult<usize>;

    async fn get_default_max_concurrency(&self) -> ConfigResult<usize>;

    /// chunk_size 上限
    async fn get_max_chunk_size(&self) -> ConfigResult<usize>;

    /// max_concurrency 上限
    async fn get_max_concurrency_limit(&self) -> ConfigResult<usize>;

    /// 单次外部调用超时（毫秒）
    ///
    /// # 默认值
    /// - 30000
    async fn get_call_timeout_ms(&self) -> ConfigResult<u64>;

    /// 预计完成时间估算: 每条记录耗时（毫秒）
    async fn get_estimated_ms_per_record(&self) -> ConfigResult<u64>;

    /// 状态 / 结果 URL 前缀
    async fn get_api_base_path(&self) -> ConfigResult<String>;

    /// 内存中保留的已归档终态操作数，超出部分只能从归档查询
    ///
    /// # 默认值
    /// - 100
    async fn get_retained_operations(&self) -> ConfigResult<usize>;

    /// 一次性读取全部配置
    async fn load_bulk_config(&self) -> ConfigResult<BulkConfig> {
        Ok(BulkConfig {
            max_records: self.get_max_records().await?,
            max_upload_bytes: self.get_max_upload_bytes().await?,
            default_chunk_size: self.get_default_chunk_size().await?,
            default_max_concurrency: self.get_default_max_concurrency().await?,
            max_chunk_size: self.get_max_chunk_size().await?,
            max_concurrency_limit: self.get_max_concurrency_limit().await?,
            call_timeout_ms: self.get_call_timeout_ms().await?,
            estimated_ms_per_record: self.get_estimated_ms_per_record().await?,
            api_base_path: self.get_api_base_path().await?,
            retained_operations: self.get_retained_operations().await?,
        })
    }
}

// 内存配置（测试与 CLI 无库场景）
#[async_trait]
impl BulkConfigReader for BulkConfig {
    async fn get_max_records(&self) -> ConfigResult<usize> {
        Ok(self.max_records)
    }

    async fn get_max_upload_bytes(&self) -> ConfigResult<usize> {
        Ok(self.max_upload_bytes)
    }

    async fn get_default_chunk_size(&self) -> ConfigResult<usize> {
        Ok(self.default_chunk_size)
    }

    async fn get_default_max_concurrency(&self) -> ConfigResult<usize> {
        Ok(self.default_max_concurrency)
    }

    async fn get_max_chunk_size(&self) -> ConfigResult<usize> {
        Ok(self.max_chunk_size)
    }

    async fn get_max_concurrency_limit(&self) -> ConfigResult<usize> {
        Ok(self.max_concurrency_limit)
    }

    async fn get_call_timeout_ms(&self) -> ConfigResult<u64> {
        Ok(self.call_timeout_ms)
    }

    async fn get_estimated_ms_per_record(&self) -> ConfigResult<u64> {
        Ok(self.estimated_ms_per_record)
    }

    async fn get_api_base_path(&self) -> ConfigResult<String> {
        Ok(self.api_base_path.clone())
    }

    async fn get_retained_operations(&self) -> ConfigResult<usize> {
        Ok(self.retained_operations)
    }
}
