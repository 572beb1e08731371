// ==========================================
// 农户批量入驻 - 分块调度器
// ==========================================
// 职责: 将记录集切分为 chunk_size 大小的有序分块，分块间串行、分块内
//       以最多 max_concurrency 个 Worker 并发处理；负责操作生命周期
// 流程（每个分块）: 校验失败记录 → 去重定论记录 → 派发剩余记录
// 红线: 分块 N+1 必须在分块 N 的全部 Worker 返回后才开始
// 红线: 取消 / 失败中止只停止新派发，在途 Worker 允许完成
// 红线: continue_on_error=false 时按 record_index 顺序确定首个失败
// ==========================================

use crate::domain::operation::{BulkOperation, ProcessingDetail, WorkEntry};
use crate::domain::types::{DetailStatus, ErrorCode};
use crate::engine::aggregator::ResultAggregator;
use crate::engine::deduplicator::{ClaimSet, DedupDecision, Deduplicator};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::processor::{RecordJob, RecordProcessor};
use crate::engine::tracker::{OperationTracker, TrackedOperation};
use crate::repository::operation_repo::BulkOperationRepository;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

pub struct ChunkScheduler {
    tracker: Arc<OperationTracker>,
    processor: Arc<RecordProcessor>,
    deduplicator: Arc<Deduplicator>,
    archive: Option<Arc<BulkOperationRepository>>,
    api_base_path: String,
}

impl ChunkScheduler {
    pub fn new(
        tracker: Arc<OperationTracker>,
        processor: Arc<RecordProcessor>,
        deduplicator: Arc<Deduplicator>,
        archive: Option<Arc<BulkOperationRepository>>,
        api_base_path: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            processor,
            deduplicator,
            archive,
            api_base_path: api_base_path.into(),
        }
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    /// 状态查询地址
    pub fn status_url(&self, operation_id: &str) -> String {
        format!("{}/operations/{}", self.api_base_path, operation_id)
    }

    /// 结果下载地址
    pub fn result_url(&self, operation_id: &str) -> String {
        format!("{}/operations/{}/results", self.api_base_path, operation_id)
    }

    /// 后台驱动操作至终态
    pub fn spawn(self: &Arc<Self>, operation_id: String) -> JoinHandle<EngineResult<BulkOperation>> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let result = scheduler.run(&operation_id).await;
            if let Err(e) = &result {
                error!(operation_id = %operation_id, error = %e, "批量操作调度失败");
            }
            result
        })
    }

    /// 驱动操作至终态（sync 模式直接等待）
    ///
    /// 调度异常时等待在途 Worker 返回，再将操作转为 FAILED
    #[instrument(skip(self))]
    pub async fn run(&self, operation_id: &str) -> EngineResult<BulkOperation> {
        let handle = self.tracker.handle(operation_id)?;
        if !handle.start()? {
            info!("操作在排队期间已取消");
            return handle.snapshot();
        }

        match self.drive(&handle).await {
            Ok(halted) => self.complete(&handle, halted),
            Err(e) => {
                error!(error = %e, "调度异常，操作转为失败");
                let operation = handle.abort(&e.to_string());
                if let Ok(details) = handle.details() {
                    self.archive(&operation, &details);
                }
                Err(e)
            }
        }
    }

    /// 逐块调度
    ///
    /// # 返回
    /// - Ok(true): 因失败中止（continue_on_error=false）
    async fn drive(&self, handle: &Arc<TrackedOperation>) -> EngineResult<bool> {
        let work_set = handle.work_set();
        let options = Arc::new(work_set.options.clone());
        let chunk_size = options.chunk_size.max(1);
        let mut claims = ClaimSet::default();

        info!(
            total_records = work_set.entries.len(),
            chunk_size,
            max_concurrency = options.max_concurrency,
            "开始调度批量操作"
        );

        for (batch_idx, chunk) in work_set.entries.chunks(chunk_size).enumerate() {
            if handle.cancel_requested() {
                info!(batch = batch_idx + 1, "已请求取消，停止派发新分块");
                break;
            }
            handle.begin_batch(batch_idx + 1)?;
            debug!(batch = batch_idx + 1, records = chunk.len(), "开始处理分块");

            // 1. 校验失败记录
            // continue_on_error=false 时在首个校验失败处截断: 其前的记录照常处理，随后中止
            let first_invalid = if options.continue_on_error {
                None
            } else {
                chunk.iter().position(|e| !e.validation.is_valid)
            };
            let (head, stopper) = match first_invalid {
                Some(idx) => (&chunk[..idx], Some(&chunk[idx])),
                None => (chunk, None),
            };

            let mut valid: Vec<&WorkEntry> = Vec::with_capacity(head.len());
            for entry in head {
                if entry.validation.is_valid {
                    valid.push(entry);
                } else {
                    handle.commit_detail(validation_failure(entry))?;
                }
            }

            // 2. 去重
            let decisions = self
                .deduplicator
                .resolve(&work_set.org_id, &valid, &options, &mut claims)
                .await;

            let mut jobs = Vec::with_capacity(decisions.len());
            for decision in decisions {
                match decision {
                    DedupDecision::Dispatch(job) => jobs.push(job),
                    DedupDecision::Settled(detail) => {
                        let failed = detail.status == DetailStatus::Failed;
                        handle.commit_detail(detail)?;
                        if failed && !options.continue_on_error {
                            warn!(batch = batch_idx + 1, "去重失败且 continue_on_error=false，停止派发");
                            return Ok(true);
                        }
                    }
                }
            }

            // 3. 派发
            if self
                .dispatch_chunk(handle, jobs, options.max_concurrency, options.continue_on_error)
                .await?
            {
                warn!(batch = batch_idx + 1, "记录处理失败且 continue_on_error=false，停止派发");
                return Ok(true);
            }

            // 4. 截断处的校验失败记录
            if let Some(entry) = stopper {
                handle.commit_detail(validation_failure(entry))?;
                warn!(
                    batch = batch_idx + 1,
                    record_index = entry.record.record_index,
                    "记录校验失败且 continue_on_error=false，停止派发"
                );
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// 以固定大小的 Worker 池处理一个分块
    ///
    /// # 返回
    /// - Ok(true): 因失败中止（continue_on_error=false）
    async fn dispatch_chunk(
        &self,
        handle: &Arc<TrackedOperation>,
        jobs: Vec<RecordJob>,
        max_concurrency: usize,
        continue_on_error: bool,
    ) -> EngineResult<bool> {
        let max_concurrency = max_concurrency.max(1);
        let mut pool: JoinSet<ProcessingDetail> = JoinSet::new();
        let mut queue = jobs.into_iter();
        let mut stop = false;
        let mut halted = false;
        let mut failure: Option<EngineError> = None;

        loop {
            while !stop && pool.len() < max_concurrency {
                if handle.cancel_requested() {
                    stop = true;
                    break;
                }
                let Some(job) = queue.next() else { break };
                let processor = Arc::clone(&self.processor);
                pool.spawn(async move {
                    let record_index = job.entry.record.record_index;
                    let external_id = job.entry.record.external_id.clone();
                    let retry_count = job.entry.retry_count;
                    match AssertUnwindSafe(processor.process(job)).catch_unwind().await {
                        Ok(detail) => detail,
                        Err(_) => ProcessingDetail::failed(
                            record_index,
                            external_id,
                            ErrorCode::Internal,
                            "worker panicked while processing record",
                            retry_count,
                        ),
                    }
                });
            }

            let Some(joined) = pool.join_next().await else {
                break;
            };
            match joined {
                Ok(detail) => {
                    if detail.status == DetailStatus::Failed && !continue_on_error && !halted {
                        halted = true;
                        stop = true;
                    }
                    // 提交失败时不立即返回，先等在途 Worker 结束
                    if let Err(e) = handle.commit_detail(detail) {
                        error!(error = %e, "提交处理明细失败，停止派发");
                        stop = true;
                        failure.get_or_insert(e);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Worker 任务异常退出");
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(halted),
        }
    }

    /// 汇总、转终态并归档
    fn complete(
        &self,
        handle: &Arc<TrackedOperation>,
        halted: bool,
    ) -> EngineResult<BulkOperation> {
        let details = handle.details()?;
        let summary = ResultAggregator::summarize(&details);
        let operation_id = handle.id()?;

        let operation = handle.finish(
            halted,
            summary.error_summary(),
            Some(self.result_url(&operation_id)),
        )?;

        info!(
            status = %operation.status,
            processed = operation.processed_records,
            successful = operation.successful_records,
            failed = operation.failed_records,
            skipped = operation.skipped_records,
            "批量操作结束"
        );

        self.archive(&operation, &details);
        Ok(operation)
    }

    /// 归档终态操作；成功后允许追踪器将其移出内存
    fn archive(&self, operation: &BulkOperation, details: &[ProcessingDetail]) {
        let Some(archive) = &self.archive else {
            return;
        };
        match archive.save(operation, details) {
            Ok(count) => {
                debug!(details = count, "批量操作已归档");
                if let Err(e) = self.tracker.mark_archived(&operation.id) {
                    warn!(error = %e, "归档标记失败");
                }
            }
            Err(e) => warn!(error = %e, "批量操作归档失败"),
        }
    }
}

fn validation_failure(entry: &WorkEntry) -> ProcessingDetail {
    ProcessingDetail::failed(
        entry.record.record_index,
        entry.record.external_id.clone(),
        ErrorCode::Validation,
        entry.validation.errors.join("; "),
        entry.retry_count,
    )
}
