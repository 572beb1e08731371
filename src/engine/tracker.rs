// ==========================================
// 农户批量入驻 - 批量操作追踪器
// ==========================================
// 职责: 持有批量操作的状态/进度，供查询、取消、重试读取，由调度器写入
// 红线: 计数只经由 commit_detail 单一互斥路径更新
// 红线: 终态不可再变；每个 record_index 只提交一份明细
// 红线: 只淘汰已归档的终态操作，淘汰后状态由归档提供
// ==========================================

use crate::domain::operation::{
    total_batches, BulkOperation, OperationWorkSet, ProcessingDetail, ProcessingOptions,
    RetryScope, WorkEntry,
};
use crate::domain::types::{DetailStatus, OperationStatus};
use crate::engine::error::{EngineError, EngineResult};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 内存中保留的已归档终态操作数（默认）
pub const DEFAULT_RETAINED_OPERATIONS: usize = 100;

// ==========================================
// TrackedOperation - 单个操作的共享句柄
// ==========================================
struct TrackedState {
    operation: BulkOperation,
    details: BTreeMap<usize, ProcessingDetail>,
}

pub struct TrackedOperation {
    state: Mutex<TrackedState>,
    cancel: AtomicBool,
    archived: AtomicBool,
    // 登记序号，淘汰时同一结束时间按登记先后
    seq: u64,
    work_set: Arc<OperationWorkSet>,
}

impl TrackedOperation {
    fn lock(&self) -> EngineResult<MutexGuard<'_, TrackedState>> {
        self.state
            .lock()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))
    }

    pub fn id(&self) -> EngineResult<String> {
        Ok(self.lock()?.operation.id.clone())
    }

    /// 不可变记录集
    pub fn work_set(&self) -> Arc<OperationWorkSet> {
        Arc::clone(&self.work_set)
    }

    /// 是否已请求取消
    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// 当前快照
    pub fn snapshot(&self) -> EngineResult<BulkOperation> {
        Ok(self.lock()?.operation.clone())
    }

    /// 全部明细（按 record_index 升序）
    pub fn details(&self) -> EngineResult<Vec<ProcessingDetail>> {
        Ok(self.lock()?.details.values().cloned().collect())
    }

    /// QUEUED → PROCESSING（已为 PROCESSING 时直接返回）
    ///
    /// # 返回
    /// - Ok(true): 已开始
    /// - Ok(false): 排队期间已被取消
    pub fn start(&self) -> EngineResult<bool> {
        let mut state = self.lock()?;
        let op = &mut state.operation;
        match op.status {
            OperationStatus::Cancelled => return Ok(false),
            OperationStatus::Processing => return Ok(true),
            _ => {}
        }
        if !op.status.can_transition_to(OperationStatus::Processing) {
            return Err(EngineError::InvalidTransition {
                from: op.status.to_string(),
                to: OperationStatus::Processing.to_string(),
            });
        }
        op.status = OperationStatus::Processing;
        op.start_time = Some(Utc::now());
        Ok(true)
    }

    /// 进入第 batch 个分块（1 基）
    pub fn begin_batch(&self, batch: usize) -> EngineResult<()> {
        let mut state = self.lock()?;
        state.operation.current_batch = batch;
        Ok(())
    }

    /// 提交一份明细
    ///
    /// # 返回
    /// - Ok(true): 已计入
    /// - Ok(false): 操作已终态或下标已提交（记录日志，不计数）
    pub fn commit_detail(&self, detail: ProcessingDetail) -> EngineResult<bool> {
        let mut state = self.lock()?;
        let TrackedState {
            operation,
            details,
        } = &mut *state;

        if operation.status.is_terminal() {
            warn!(
                operation_id = %operation.id,
                record_index = detail.record_index,
                "操作已结束，丢弃明细"
            );
            return Ok(false);
        }
        if details.contains_key(&detail.record_index) {
            warn!(
                operation_id = %operation.id,
                record_index = detail.record_index,
                "重复提交的明细，已忽略"
            );
            return Ok(false);
        }

        match detail.status {
            DetailStatus::Success => operation.successful_records += 1,
            DetailStatus::Failed => operation.failed_records += 1,
            DetailStatus::Skipped => operation.skipped_records += 1,
        }
        operation.processed_records += 1;
        operation.recompute_progress();
        details.insert(detail.record_index, detail);
        Ok(true)
    }

    /// 调度结束: 按取消 / 中止 / 完成确定终态
    pub fn finish(
        &self,
        halted: bool,
        error_summary: Option<String>,
        result_file_url: Option<String>,
    ) -> EngineResult<BulkOperation> {
        let mut state = self.lock()?;
        let op = &mut state.operation;
        if op.status.is_terminal() {
            return Ok(op.clone());
        }

        let next = if self.cancel_requested() {
            OperationStatus::Cancelled
        } else if halted {
            OperationStatus::Failed
        } else {
            OperationStatus::Completed
        };
        if !op.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: op.status.to_string(),
                to: next.to_string(),
            });
        }

        op.status = next;
        op.end_time = Some(Utc::now());
        op.error_summary = error_summary;
        op.result_file_url = result_file_url;
        op.can_retry = op.failed_records > 0 || op.processed_records < op.total_records;
        op.recompute_progress();
        Ok(op.clone())
    }

    /// 调度异常中止: 直接转 FAILED
    ///
    /// 锁已中毒时恢复并清除中毒标记，保证操作仍可查询
    pub fn abort(&self, reason: &str) -> BulkOperation {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.clear_poison();
        let op = &mut state.operation;
        if !op.status.is_terminal() {
            op.status = OperationStatus::Failed;
            op.end_time = Some(Utc::now());
            op.error_summary = Some(format!("processing aborted: {}", reason));
            op.can_retry = true;
            op.recompute_progress();
        }
        op.clone()
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.state.lock();
            panic!("poisoned for test");
        }));
    }

    /// 请求取消
    ///
    /// QUEUED 立即 CANCELLED；PROCESSING 只置标记，由调度器在在途任务结束后转终态；
    /// 终态为幂等空操作
    pub fn cancel(&self) -> EngineResult<BulkOperation> {
        let mut state = self.lock()?;
        let op = &mut state.operation;
        match op.status {
            OperationStatus::Queued => {
                self.cancel.store(true, Ordering::SeqCst);
                op.cancellation_requested = true;
                op.status = OperationStatus::Cancelled;
                op.end_time = Some(Utc::now());
                op.can_retry = op.total_records > 0;
            }
            OperationStatus::Processing => {
                self.cancel.store(true, Ordering::SeqCst);
                op.cancellation_requested = true;
            }
            _ => {}
        }
        Ok(op.clone())
    }
}

// ==========================================
// OperationTracker - 操作注册表
// ==========================================
pub struct OperationTracker {
    operations: RwLock<HashMap<String, Arc<TrackedOperation>>>,
    next_seq: AtomicU64,
    retained_operations: usize,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_OPERATIONS)
    }
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// # 参数
    /// - retained_operations: 内存中最多保留的已归档终态操作数
    pub fn with_retention(retained_operations: usize) -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            retained_operations,
        }
    }

    /// 注册新操作（QUEUED）
    ///
    /// # 参数
    /// - work_set: 物化记录集（此后不可变）
    /// - parent_operation_id: 重试派生时的原操作 ID
    pub fn register(
        &self,
        work_set: OperationWorkSet,
        parent_operation_id: Option<String>,
    ) -> EngineResult<BulkOperation> {
        let total = work_set.entries.len();
        let operation = BulkOperation {
            id: Uuid::new_v4().to_string(),
            org_id: work_set.org_id.clone(),
            parent_operation_id,
            status: OperationStatus::Queued,
            input_format: work_set.input_format,
            processing_mode: work_set.processing_mode,
            options: work_set.options.clone(),
            total_records: total,
            processed_records: 0,
            successful_records: 0,
            failed_records: 0,
            skipped_records: 0,
            progress_percentage: 0.0,
            current_batch: 0,
            total_batches: total_batches(total, work_set.options.chunk_size),
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            error_summary: None,
            result_file_url: None,
            can_retry: false,
            cancellation_requested: false,
        };

        let tracked = Arc::new(TrackedOperation {
            state: Mutex::new(TrackedState {
                operation: operation.clone(),
                details: BTreeMap::new(),
            }),
            cancel: AtomicBool::new(false),
            archived: AtomicBool::new(false),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            work_set: Arc::new(work_set),
        });

        self.operations
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?
            .insert(operation.id.clone(), tracked);

        info!(
            operation_id = %operation.id,
            org_id = %operation.org_id,
            total_records = total,
            total_batches = operation.total_batches,
            "批量操作已登记"
        );
        Ok(operation)
    }

    /// 获取操作句柄
    pub fn handle(&self, operation_id: &str) -> EngineResult<Arc<TrackedOperation>> {
        self.operations
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?
            .get(operation_id)
            .cloned()
            .ok_or_else(|| EngineError::OperationNotFound(operation_id.to_string()))
    }

    pub fn contains(&self, operation_id: &str) -> bool {
        self.handle(operation_id).is_ok()
    }

    pub fn get_status(&self, operation_id: &str) -> EngineResult<BulkOperation> {
        self.handle(operation_id)?.snapshot()
    }

    pub fn details(&self, operation_id: &str) -> EngineResult<Vec<ProcessingDetail>> {
        self.handle(operation_id)?.details()
    }

    pub fn start(&self, operation_id: &str) -> EngineResult<bool> {
        self.handle(operation_id)?.start()
    }

    pub fn begin_batch(&self, operation_id: &str, batch: usize) -> EngineResult<()> {
        self.handle(operation_id)?.begin_batch(batch)
    }

    pub fn commit_detail(&self, operation_id: &str, detail: ProcessingDetail) -> EngineResult<bool> {
        self.handle(operation_id)?.commit_detail(detail)
    }

    pub fn cancel(&self, operation_id: &str) -> EngineResult<BulkOperation> {
        let operation = self.handle(operation_id)?.cancel()?;
        info!(operation_id, status = %operation.status, "已请求取消批量操作");
        Ok(operation)
    }

    /// 标记操作已归档，并淘汰超出保留数的最早归档终态操作
    ///
    /// # 返回
    /// - 本次淘汰的操作数
    pub fn mark_archived(&self, operation_id: &str) -> EngineResult<usize> {
        self.handle(operation_id)?
            .archived
            .store(true, Ordering::SeqCst);

        let mut operations = self
            .operations
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;

        let mut evictable = Vec::new();
        for (id, tracked) in operations.iter() {
            if !tracked.archived.load(Ordering::SeqCst) {
                continue;
            }
            let snapshot = tracked.snapshot()?;
            if snapshot.status.is_terminal() {
                let finished_at = snapshot.end_time.unwrap_or(snapshot.created_at);
                evictable.push((finished_at, tracked.seq, id.clone()));
            }
        }
        if evictable.len() <= self.retained_operations {
            return Ok(0);
        }

        evictable.sort();
        let excess = evictable.len() - self.retained_operations;
        for (_, _, id) in evictable.into_iter().take(excess) {
            operations.remove(&id);
            debug!(operation_id = %id, "已归档操作移出内存");
        }
        Ok(excess)
    }

    /// 按组织列出内存中的操作（创建时间倒序）
    pub fn list(&self, org_id: &str) -> EngineResult<Vec<BulkOperation>> {
        let handles: Vec<Arc<TrackedOperation>> = self
            .operations
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?
            .values()
            .cloned()
            .collect();

        let mut operations = Vec::new();
        for handle in handles {
            let snapshot = handle.snapshot()?;
            if snapshot.org_id == org_id {
                operations.push(snapshot);
            }
        }
        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(operations)
    }

    /// 构造重试用的新记录集（原操作保持不变）
    ///
    /// # 参数
    /// - operation_id: 原操作（必须已终态）
    /// - scope: 失败记录 / 全部 / 指定下标
    /// - options: 覆盖选项（None 沿用原操作选项）
    ///
    /// # 返回
    /// - 新的记录集，retry_count = 上次 + 1
    pub fn retry_work_set(
        &self,
        operation_id: &str,
        scope: &RetryScope,
        options: Option<ProcessingOptions>,
    ) -> EngineResult<OperationWorkSet> {
        let handle = self.handle(operation_id)?;
        let (status, details) = {
            let state = handle.lock()?;
            (state.operation.status, state.details.clone())
        };
        if !status.is_terminal() {
            return Err(EngineError::OperationNotTerminal(operation_id.to_string()));
        }

        let work_set = handle.work_set();
        let by_index: BTreeMap<usize, &WorkEntry> = work_set
            .entries
            .iter()
            .map(|e| (e.record.record_index, e))
            .collect();

        let selected: BTreeSet<usize> = match scope {
            RetryScope::All => by_index.keys().copied().collect(),
            // 失败 + 从未派发的记录
            RetryScope::FailedOnly => by_index
                .keys()
                .copied()
                .filter(|idx| {
                    details
                        .get(idx)
                        .map_or(true, |d| d.status == DetailStatus::Failed)
                })
                .collect(),
            RetryScope::Indices(indices) => {
                let unknown: Vec<usize> = indices
                    .iter()
                    .copied()
                    .filter(|idx| !by_index.contains_key(idx))
                    .collect();
                if !unknown.is_empty() {
                    return Err(EngineError::UnknownRecordIndices { indices: unknown });
                }
                indices.iter().copied().collect()
            }
        };

        if selected.is_empty() {
            return Err(EngineError::NothingToRetry(operation_id.to_string()));
        }

        let entries: Vec<WorkEntry> = selected
            .iter()
            .filter_map(|idx| by_index.get(idx))
            .map(|entry| {
                let previous = details
                    .get(&entry.record.record_index)
                    .map_or(entry.retry_count, |d| d.retry_count);
                WorkEntry {
                    record: entry.record.clone(),
                    validation: entry.validation.clone(),
                    retry_count: previous + 1,
                }
            })
            .collect();

        Ok(OperationWorkSet {
            org_id: work_set.org_id.clone(),
            input_format: work_set.input_format,
            processing_mode: work_set.processing_mode,
            options: options.unwrap_or_else(|| work_set.options.clone()),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::farmer::{FarmerAddress, NormalizedFarmerRecord};
    use crate::domain::operation::ValidationOutcome;
    use crate::domain::types::{ErrorCode, InputFormat, ProcessingMode, RecordAction};
    use std::collections::BTreeMap as Map;

    fn work_set(n: usize) -> OperationWorkSet {
        let entries = (0..n)
            .map(|i| WorkEntry {
                record: NormalizedFarmerRecord {
                    record_index: i,
                    external_id: Some(format!("EXT-{i}")),
                    first_name: "A".to_string(),
                    last_name: "B".to_string(),
                    phone_number: format!("98765432{i:02}"),
                    email: None,
                    date_of_birth: None,
                    gender: None,
                    address: FarmerAddress::default(),
                    custom_fields: Map::new(),
                    password: None,
                },
                validation: ValidationOutcome {
                    is_valid: true,
                    errors: vec![],
                    warnings: vec![],
                },
                retry_count: 0,
            })
            .collect();
        OperationWorkSet {
            org_id: "org-1".to_string(),
            input_format: InputFormat::Csv,
            processing_mode: ProcessingMode::Async,
            options: ProcessingOptions {
                chunk_size: 2,
                ..ProcessingOptions::default()
            },
            entries,
        }
    }

    #[test]
    fn test_register_and_commit_counters() {
        let tracker = OperationTracker::new();
        let op = tracker.register(work_set(3), None).unwrap();
        assert_eq!(op.status, OperationStatus::Queued);
        assert_eq!(op.total_batches, 2);

        assert!(tracker.start(&op.id).unwrap());
        tracker
            .commit_detail(
                &op.id,
                ProcessingDetail::success(0, None, "f-0".into(), RecordAction::Created, 0),
            )
            .unwrap();
        tracker
            .commit_detail(
                &op.id,
                ProcessingDetail::failed(1, None, ErrorCode::Validation, "x", 0),
            )
            .unwrap();
        // 重复下标不计数
        assert!(!tracker
            .commit_detail(&op.id, ProcessingDetail::skipped(1, None, None, "dup", 0))
            .unwrap());

        let snapshot = tracker.get_status(&op.id).unwrap();
        assert_eq!(snapshot.processed_records, 2);
        assert_eq!(snapshot.successful_records, 1);
        assert_eq!(snapshot.failed_records, 1);
        assert!(snapshot.counters_consistent());
        assert_eq!(snapshot.progress_percentage, 66.67);
    }

    #[test]
    fn test_cancel_queued_is_immediate_and_terminal_is_noop() {
        let tracker = OperationTracker::new();
        let op = tracker.register(work_set(1), None).unwrap();

        let cancelled = tracker.cancel(&op.id).unwrap();
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert!(!tracker.start(&op.id).unwrap());

        // 终态后再次取消为空操作
        let again = tracker.cancel(&op.id).unwrap();
        assert_eq!(again.end_time, cancelled.end_time);
        // 终态后提交的明细被丢弃
        assert!(!tracker
            .commit_detail(&op.id, ProcessingDetail::skipped(0, None, None, "late", 0))
            .unwrap());
    }

    #[test]
    fn test_cancel_processing_defers_terminal_state() {
        let tracker = OperationTracker::new();
        let op = tracker.register(work_set(2), None).unwrap();
        tracker.start(&op.id).unwrap();

        let requested = tracker.cancel(&op.id).unwrap();
        assert_eq!(requested.status, OperationStatus::Processing);
        assert!(requested.cancellation_requested);

        let finished = tracker.handle(&op.id).unwrap().finish(false, None, None).unwrap();
        assert_eq!(finished.status, OperationStatus::Cancelled);
        assert!(finished.can_retry);
    }

    #[test]
    fn test_start_is_idempotent_once_processing() {
        let tracker = OperationTracker::new();
        let op = tracker.register(work_set(1), None).unwrap();
        assert!(tracker.start(&op.id).unwrap());
        let started_at = tracker.get_status(&op.id).unwrap().start_time;

        assert!(tracker.start(&op.id).unwrap());
        let again = tracker.get_status(&op.id).unwrap();
        assert_eq!(again.status, OperationStatus::Processing);
        assert_eq!(again.start_time, started_at);
    }

    #[test]
    fn test_abort_recovers_poisoned_state() {
        let tracker = OperationTracker::new();
        let op = tracker.register(work_set(3), None).unwrap();
        let handle = tracker.handle(&op.id).unwrap();
        handle.start().unwrap();
        handle
            .commit_detail(ProcessingDetail::success(0, None, "f".into(), RecordAction::Created, 0))
            .unwrap();

        handle.poison();
        assert!(matches!(handle.snapshot(), Err(EngineError::LockPoisoned(_))));

        let aborted = handle.abort("lock poisoned");
        assert_eq!(aborted.status, OperationStatus::Failed);
        assert!(aborted.can_retry);
        assert_eq!(aborted.processed_records, 1);
        assert!(aborted.error_summary.unwrap().contains("lock poisoned"));

        // 中毒已清除，可继续查询；终态后再次中止不变
        assert_eq!(tracker.get_status(&op.id).unwrap().status, OperationStatus::Failed);
        assert_eq!(handle.abort("again").end_time, tracker.get_status(&op.id).unwrap().end_time);
    }

    #[test]
    fn test_mark_archived_evicts_oldest_terminal_operations() {
        let tracker = OperationTracker::with_retention(1);

        let running = tracker.register(work_set(1), None).unwrap();
        tracker.start(&running.id).unwrap();

        let mut finished = Vec::new();
        for _ in 0..3 {
            let op = tracker.register(work_set(1), None).unwrap();
            let handle = tracker.handle(&op.id).unwrap();
            handle.start().unwrap();
            handle.finish(false, None, None).unwrap();
            finished.push(op.id);
        }

        // 未归档的终态操作不淘汰
        assert_eq!(tracker.mark_archived(&finished[0]).unwrap(), 0);
        assert_eq!(tracker.mark_archived(&finished[1]).unwrap(), 1);
        assert!(!tracker.contains(&finished[0]));
        assert!(tracker.contains(&finished[1]));

        assert_eq!(tracker.mark_archived(&finished[2]).unwrap(), 1);
        assert!(!tracker.contains(&finished[1]));
        assert!(tracker.contains(&finished[2]));

        // 运行中的操作即使已标记也保留
        assert_eq!(tracker.mark_archived(&running.id).unwrap(), 0);
        assert!(tracker.contains(&running.id));
        assert_eq!(tracker.list("org-1").unwrap().len(), 2);
    }

    #[test]
    fn test_retry_work_set_scopes() {
        let tracker = OperationTracker::new();
        let op = tracker.register(work_set(4), None).unwrap();
        let handle = tracker.handle(&op.id).unwrap();

        // 运行中不可重试
        handle.start().unwrap();
        assert!(matches!(
            tracker.retry_work_set(&op.id, &RetryScope::FailedOnly, None),
            Err(EngineError::OperationNotTerminal(_))
        ));

        handle
            .commit_detail(ProcessingDetail::success(0, None, "f".into(), RecordAction::Created, 0))
            .unwrap();
        handle
            .commit_detail(ProcessingDetail::failed(1, None, ErrorCode::Timeout, "t", 0))
            .unwrap();
        handle
            .commit_detail(ProcessingDetail::skipped(2, None, None, "s", 0))
            .unwrap();
        handle.finish(true, None, None).unwrap();

        // 失败 + 未派发（下标 3）
        let failed = tracker
            .retry_work_set(&op.id, &RetryScope::FailedOnly, None)
            .unwrap();
        let indices: Vec<usize> = failed.entries.iter().map(|e| e.record.record_index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(failed.entries.iter().all(|e| e.retry_count == 1));

        let all = tracker.retry_work_set(&op.id, &RetryScope::All, None).unwrap();
        assert_eq!(all.entries.len(), 4);

        assert!(matches!(
            tracker.retry_work_set(&op.id, &RetryScope::Indices(vec![1, 9]), None),
            Err(EngineError::UnknownRecordIndices { .. })
        ));
        assert!(matches!(
            tracker.retry_work_set(&op.id, &RetryScope::Indices(vec![]), None),
            Err(EngineError::NothingToRetry(_))
        ));

        // 原操作不变
        let original = tracker.get_status(&op.id).unwrap();
        assert_eq!(original.processed_records, 3);
        assert_eq!(original.status, OperationStatus::Failed);
    }
}
