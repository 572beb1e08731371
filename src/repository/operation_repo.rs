// ==========================================
// 农户批量入驻 - 批量操作归档仓储
// ==========================================
// 职责: 已结束操作及其处理明细的持久化 / 查询
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::operation::{AncillaryOutcome, BulkOperation, ProcessingDetail, ProcessingOptions};
use crate::domain::types::{
    DetailStatus, ErrorCode, InputFormat, OperationStatus, ProcessingMode, RecordAction,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const OPERATION_COLUMNS: &str = "operation_id, org_id, parent_operation_id, status, input_format, \
     processing_mode, options_json, total_records, processed_records, successful_records, \
     failed_records, skipped_records, current_batch, total_batches, created_at, start_time, \
     end_time, error_summary, result_file_url, can_retry";

// 未解析的操作行（枚举与 JSON 列在外层转换）
struct OperationRow {
    operation: BulkOperation,
    input_format: String,
    processing_mode: String,
    options_json: String,
}

// ==========================================
// BulkOperationRepository - 批量操作仓储
// ==========================================
pub struct BulkOperationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BulkOperationRepository {
    /// 创建新的仓储实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 归档操作及其全部明细（事务，重复归档覆盖）
    ///
    /// # 返回
    /// - Ok(usize): 写入的明细条数
    pub fn save(
        &self,
        operation: &BulkOperation,
        details: &[ProcessingDetail],
    ) -> RepositoryResult<usize> {
        let options_json = serde_json::to_string(&operation.options)?;
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        tx.execute(
            "DELETE FROM bulk_processing_detail WHERE operation_id = ?1",
            params![operation.id],
        )?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO bulk_operation ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                OPERATION_COLUMNS
            ),
            params![
                operation.id,
                operation.org_id,
                operation.parent_operation_id,
                operation.status.to_db_str(),
                operation.input_format.as_str(),
                operation.processing_mode.as_str(),
                options_json,
                operation.total_records as i64,
                operation.processed_records as i64,
                operation.successful_records as i64,
                operation.failed_records as i64,
                operation.skipped_records as i64,
                operation.current_batch as i64,
                operation.total_batches as i64,
                operation.created_at,
                operation.start_time,
                operation.end_time,
                operation.error_summary,
                operation.result_file_url,
                operation.can_retry,
            ],
        )?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO bulk_processing_detail (
                    operation_id, record_index, external_id, status, action, farmer_id,
                    error, error_code, processed_at, retry_count, kisan_sathi_json, credentials_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )?;
            for detail in details {
                stmt.execute(params![
                    operation.id,
                    detail.record_index as i64,
                    detail.external_id,
                    detail.status.to_db_str(),
                    detail.action.map(|a| a.to_db_str()),
                    detail.farmer_id,
                    detail.error,
                    detail.error_code.map(|c| c.to_db_str()),
                    detail.processed_at,
                    detail.retry_count,
                    serde_json::to_string(&detail.kisan_sathi)?,
                    serde_json::to_string(&detail.credentials)?,
                ])?;
                count += 1;
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    fn map_operation_row(row: &Row<'_>) -> rusqlite::Result<OperationRow> {
        let status: String = row.get(3)?;
        let status = OperationStatus::from_db_str(&status);
        let operation = BulkOperation {
            id: row.get(0)?,
            org_id: row.get(1)?,
            parent_operation_id: row.get(2)?,
            status,
            input_format: InputFormat::Csv,
            processing_mode: ProcessingMode::Async,
            options: ProcessingOptions::default(),
            total_records: row.get::<_, i64>(7)? as usize,
            processed_records: row.get::<_, i64>(8)? as usize,
            successful_records: row.get::<_, i64>(9)? as usize,
            failed_records: row.get::<_, i64>(10)? as usize,
            skipped_records: row.get::<_, i64>(11)? as usize,
            progress_percentage: 0.0,
            current_batch: row.get::<_, i64>(12)? as usize,
            total_batches: row.get::<_, i64>(13)? as usize,
            created_at: row.get::<_, DateTime<Utc>>(14)?,
            start_time: row.get::<_, Option<DateTime<Utc>>>(15)?,
            end_time: row.get::<_, Option<DateTime<Utc>>>(16)?,
            error_summary: row.get(17)?,
            result_file_url: row.get(18)?,
            can_retry: row.get(19)?,
            cancellation_requested: status == OperationStatus::Cancelled,
        };
        Ok(OperationRow {
            operation,
            input_format: row.get(4)?,
            processing_mode: row.get(5)?,
            options_json: row.get(6)?,
        })
    }

    fn hydrate_operation(row: OperationRow) -> RepositoryResult<BulkOperation> {
        let mut operation = row.operation;
        operation.input_format =
            row.input_format
                .parse()
                .map_err(|e: String| RepositoryError::FieldValueError {
                    field: "input_format".to_string(),
                    message: e,
                })?;
        operation.processing_mode =
            row.processing_mode
                .parse()
                .map_err(|e: String| RepositoryError::FieldValueError {
                    field: "processing_mode".to_string(),
                    message: e,
                })?;
        operation.options = serde_json::from_str(&row.options_json)?;
        operation.recompute_progress();
        Ok(operation)
    }

    /// 按 ID 查询归档操作
    ///
    /// # 返回
    /// - Ok(Some(BulkOperation)): 找到
    /// - Ok(None): 未归档
    pub fn find_by_id(&self, operation_id: &str) -> RepositoryResult<Option<BulkOperation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM bulk_operation WHERE operation_id = ?1",
            OPERATION_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![operation_id], Self::map_operation_row)
            .optional()?;
        row.map(Self::hydrate_operation).transpose()
    }

    /// 按组织列出归档操作（创建时间倒序）
    pub fn list_by_org(&self, org_id: &str) -> RepositoryResult<Vec<BulkOperation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM bulk_operation WHERE org_id = ?1 ORDER BY created_at DESC",
            OPERATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![org_id], Self::map_operation_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::hydrate_operation).collect()
    }

    /// 查询操作的处理明细（按 record_index 升序）
    pub fn find_details(&self, operation_id: &str) -> RepositoryResult<Vec<ProcessingDetail>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT record_index, external_id, status, action, farmer_id, error, error_code,
                   processed_at, retry_count, kisan_sathi_json, credentials_json
            FROM bulk_processing_detail
            WHERE operation_id = ?1
            ORDER BY record_index
            "#,
        )?;

        let rows = stmt
            .query_map(params![operation_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, DateTime<Utc>>(7)?,
                    row.get::<_, u32>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(idx, external_id, status, action, farmer_id, error, code, at, retry, ks, cred)| {
                    Ok(ProcessingDetail {
                        record_index: idx as usize,
                        external_id,
                        status: DetailStatus::from_db_str(&status),
                        action: action.as_deref().and_then(RecordAction::from_db_str),
                        farmer_id,
                        error,
                        error_code: code.as_deref().and_then(ErrorCode::from_db_str),
                        processed_at: at,
                        retry_count: retry,
                        kisan_sathi: serde_json::from_str::<AncillaryOutcome>(&ks)?,
                        credentials: serde_json::from_str::<AncillaryOutcome>(&cred)?,
                    })
                },
            )
            .collect()
    }
}
