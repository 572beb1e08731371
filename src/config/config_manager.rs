// ==========================================
// 农户批量入驻 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::bulk_config_trait::{BulkConfig, BulkConfigReader};
use crate::config::error::{ConfigError, ConfigResult};
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
    defaults: BulkConfig,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            defaults: BulkConfig::default(),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 会对传入连接再次应用统一 PRAGMA（幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ConfigError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
        }

        Ok(Self {
            conn,
            defaults: BulkConfig::default(),
        })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 写入 global 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;

        Ok(())
    }

    /// 获取所有 bulk/ 前缀配置的快照
    pub fn get_config_snapshot(&self) -> ConfigResult<BTreeMap<String, String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' AND key LIKE 'bulk/%' ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    /// 读取并解析配置值，缺失或非法时回落到默认值
    ///
    /// 非法值只告警，不中断提交
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy + PartialOrd + From<u8>,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };

        match raw.trim().parse::<T>() {
            Ok(v) if v >= T::from(1u8) => Ok(v),
            _ => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %raw,
                    "配置值非法，使用默认值"
                );
                Ok(default)
            }
        }
    }
}

// ==========================================
// BulkConfigReader Trait 实现
// ==========================================
#[async_trait]
impl BulkConfigReader for ConfigManager {
    async fn get_max_records(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::MAX_RECORDS, self.defaults.max_records)
    }

    async fn get_max_upload_bytes(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::MAX_UPLOAD_BYTES, self.defaults.max_upload_bytes)
    }

    async fn get_default_chunk_size(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(
            config_keys::DEFAULT_CHUNK_SIZE,
            self.defaults.default_chunk_size,
        )
    }

    async fn get_default_max_concurrency(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(
            config_keys::DEFAULT_MAX_CONCURRENCY,
            self.defaults.default_max_concurrency,
        )
    }

    async fn get_max_chunk_size(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::MAX_CHUNK_SIZE, self.defaults.max_chunk_size)
    }

    async fn get_max_concurrency_limit(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(
            config_keys::MAX_CONCURRENCY_LIMIT,
            self.defaults.max_concurrency_limit,
        )
    }

    async fn get_call_timeout_ms(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(config_keys::CALL_TIMEOUT_MS, self.defaults.call_timeout_ms)
    }

    async fn get_estimated_ms_per_record(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(
            config_keys::ESTIMATED_MS_PER_RECORD,
            self.defaults.estimated_ms_per_record,
        )
    }

    async fn get_api_base_path(&self) -> ConfigResult<String> {
        let value = self
            .get_global_config_value(config_keys::API_BASE_PATH)?
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());
        Ok(value.unwrap_or_else(|| self.defaults.api_base_path.clone()))
    }

    async fn get_retained_operations(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(
            config_keys::RETAINED_OPERATIONS,
            self.defaults.retained_operations,
        )
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 上传限制
    pub const MAX_RECORDS: &str = "bulk/max_records";
    pub const MAX_UPLOAD_BYTES: &str = "bulk/max_upload_bytes";

    // 分块与并发
    pub const DEFAULT_CHUNK_SIZE: &str = "bulk/default_chunk_size";
    pub const DEFAULT_MAX_CONCURRENCY: &str = "bulk/default_max_concurrency";
    pub const MAX_CHUNK_SIZE: &str = "bulk/max_chunk_size";
    pub const MAX_CONCURRENCY_LIMIT: &str = "bulk/max_concurrency_limit";

    // 外部调用
    pub const CALL_TIMEOUT_MS: &str = "bulk/call_timeout_ms";

    // 对外接口
    pub const ESTIMATED_MS_PER_RECORD: &str = "bulk/estimated_ms_per_record";
    pub const API_BASE_PATH: &str = "bulk/api_base_path";

    // 内存保留
    pub const RETAINED_OPERATIONS: &str = "bulk/retained_operations";
}
