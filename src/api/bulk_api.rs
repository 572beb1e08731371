// ==========================================
// 农户批量入驻 - 批量操作API
// ==========================================
// 职责: 提交 / 状态查询 / 取消 / 重试 / 结果下载 / 模板 / 列表
// 红线: 解析与预检错误同步返回；单条记录错误只进入处理明细
// ==========================================

use crate::api::dto::{
    RetryRequest, StatusResponse, SubmitOptions, SubmitRequest, SubmitResponse, TemplateField,
};
use crate::api::error::{ApiError, ApiResult};
use crate::config::{BulkConfig, BulkConfigReader};
use crate::domain::farmer::NormalizedFarmerRecord;
use crate::domain::operation::{
    BulkOperation, OperationWorkSet, ProcessingDetail, ProcessingOptions, WorkEntry,
};
use crate::domain::types::{InputFormat, ProcessingMode};
use crate::engine::{
    ChunkScheduler, EngineError, OperationTracker, RenderedReport, ResultAggregator,
};
use crate::importer::{ImportError, RecordValidator, UniversalFileParser, ValidatorImpl};
use crate::repository::BulkOperationRepository;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 模板字段: (name, display_name, type, required, example)
const TEMPLATE_FIELDS: [(&str, &str, &str, bool, &str); 15] = [
    ("external_id", "External ID", "string", false, "FRM-9876543220-SP"),
    ("first_name", "First Name", "string", true, "Suresh"),
    ("last_name", "Last Name", "string", true, "Patel"),
    ("phone_number", "Phone Number", "phone", true, "9876543220"),
    ("email", "Email", "email", false, "suresh.patel@example.com"),
    ("date_of_birth", "Date of Birth", "date", false, "1985-03-15"),
    ("gender", "Gender", "enum", false, "male"),
    ("street_address", "Street Address", "string", false, "12 Main Road"),
    ("village", "Village", "string", false, "Karamsad"),
    ("block", "Block", "string", false, "Anand"),
    ("district", "District", "string", false, "Anand"),
    ("state", "State", "string", false, "Gujarat"),
    ("pincode", "Pincode", "string", false, "388325"),
    ("country", "Country", "string", false, "India"),
    ("password", "Password", "string", false, ""),
];

/// 批量操作API
pub struct BulkApi {
    config: Arc<dyn BulkConfigReader>,
    tracker: Arc<OperationTracker>,
    scheduler: Arc<ChunkScheduler>,
    archive: Option<Arc<BulkOperationRepository>>,
    validator: ValidatorImpl,
}

impl BulkApi {
    /// 创建新的BulkApi实例
    ///
    /// # 参数
    /// - config: 批量配置读取器
    /// - scheduler: 分块调度器（持有操作追踪器）
    /// - archive: 终态操作归档仓储（None 时仅查询内存）
    pub fn new(
        config: Arc<dyn BulkConfigReader>,
        scheduler: Arc<ChunkScheduler>,
        archive: Option<Arc<BulkOperationRepository>>,
    ) -> Self {
        Self {
            config,
            tracker: Arc::clone(scheduler.tracker()),
            scheduler,
            archive,
            validator: ValidatorImpl::new(),
        }
    }

    // ==========================================
    // 提交
    // ==========================================

    /// 提交批量入驻
    ///
    /// # 参数
    /// - request: 组织 / 格式 / 处理模式 / 选项
    /// - data: 上传文件内容
    ///
    /// # 返回
    /// - Ok(SubmitResponse): sync 模式为终态，否则为 PROCESSING
    /// - Err(ApiError): 解析或预检失败，未创建任何操作
    #[instrument(skip(self, request, data), fields(org_id = %request.org_id, bytes = data.len()))]
    pub async fn submit(&self, request: SubmitRequest, data: &[u8]) -> ApiResult<SubmitResponse> {
        let org_id = request.org_id.trim().to_string();
        if org_id.is_empty() {
            return Err(ApiError::InvalidInput("org_id is required".to_string()));
        }

        let config = self.config.load_bulk_config().await?;
        if data.len() > config.max_upload_bytes {
            return Err(ImportError::FileTooLarge {
                size: data.len(),
                limit: config.max_upload_bytes,
            }
            .into());
        }

        let format = resolve_format(request.input_format, request.file_name.as_deref())?;

        let base = ProcessingOptions {
            chunk_size: config.default_chunk_size,
            max_concurrency: config.default_max_concurrency,
            ..ProcessingOptions::default()
        };
        let options = request.options.resolve(&base);
        options
            .check(config.max_chunk_size, config.max_concurrency_limit)
            .map_err(ApiError::InvalidInput)?;

        let records = UniversalFileParser::new(config.max_records).parse(format, data)?;
        let entries = self.validate_records(records);
        let invalid = entries.iter().filter(|e| !e.validation.is_valid).count();
        info!(
            format = %format,
            total_records = entries.len(),
            invalid_records = invalid,
            "上传文件解析完成"
        );

        let work_set = OperationWorkSet {
            org_id,
            input_format: format,
            processing_mode: request.processing_mode,
            options,
            entries,
        };
        self.launch(work_set, None, &config).await
    }

    /// 校验并补全默认值（不合法记录保持原样，由调度器记为 VALIDATION 失败）
    fn validate_records(&self, records: Vec<NormalizedFarmerRecord>) -> Vec<WorkEntry> {
        records
            .into_iter()
            .map(|record| {
                let validation = self.validator.validate(&record);
                let record = if validation.is_valid {
                    self.validator.apply_defaults(&record)
                } else {
                    record
                };
                WorkEntry {
                    record,
                    validation,
                    retry_count: 0,
                }
            })
            .collect()
    }

    /// 登记并按处理模式启动
    async fn launch(
        &self,
        work_set: OperationWorkSet,
        parent_operation_id: Option<String>,
        config: &BulkConfig,
    ) -> ApiResult<SubmitResponse> {
        let operation = self.tracker.register(work_set, parent_operation_id)?;

        match operation.processing_mode {
            ProcessingMode::Sync => {
                let finished = self.scheduler.run(&operation.id).await?;
                Ok(self.submit_response(&finished, config))
            }
            ProcessingMode::Async | ProcessingMode::Batch => {
                // 先同步转为 PROCESSING 再交给后台任务
                self.tracker.start(&operation.id)?;
                let started = self.tracker.get_status(&operation.id)?;
                // 后台任务句柄不保留，终态由追踪器 / 归档查询
                drop(self.scheduler.spawn(operation.id.clone()));
                Ok(self.submit_response(&started, config))
            }
        }
    }

    fn submit_response(&self, operation: &BulkOperation, config: &BulkConfig) -> SubmitResponse {
        let terminal = operation.status.is_terminal();
        SubmitResponse {
            operation_id: operation.id.clone(),
            status: operation.status,
            total_records: operation.total_records,
            status_url: self.scheduler.status_url(&operation.id),
            result_url: terminal.then(|| self.scheduler.result_url(&operation.id)),
            estimated_completion: if terminal {
                None
            } else {
                estimate_completion(
                    operation.total_records,
                    operation.options.max_concurrency,
                    config.estimated_ms_per_record,
                )
            },
        }
    }

    // ==========================================
    // 查询 / 取消
    // ==========================================

    /// 查询操作状态（内存优先，回落到归档）
    pub async fn get_status(&self, operation_id: &str) -> ApiResult<StatusResponse> {
        let operation = self.load_operation(operation_id)?;
        Ok(StatusResponse::from(&operation))
    }

    /// 请求取消
    ///
    /// # 说明
    /// - QUEUED: 立即 CANCELLED
    /// - PROCESSING: 置取消标志，在途记录完成后 CANCELLED
    /// - 终态: 不变，原样返回
    #[instrument(skip(self))]
    pub async fn cancel(&self, operation_id: &str) -> ApiResult<StatusResponse> {
        match self.tracker.cancel(operation_id) {
            Ok(operation) => Ok(StatusResponse::from(&operation)),
            Err(EngineError::OperationNotFound(_)) => {
                // 已归档的操作必为终态
                let operation = self.load_operation(operation_id)?;
                Ok(StatusResponse::from(&operation))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 按组织列出操作（内存 + 归档，创建时间倒序）
    pub async fn list_operations(&self, org_id: &str) -> ApiResult<Vec<StatusResponse>> {
        let mut operations = self.tracker.list(org_id)?;
        let mut seen: HashSet<String> = operations.iter().map(|op| op.id.clone()).collect();

        if let Some(archive) = &self.archive {
            for op in archive.list_by_org(org_id)? {
                if seen.insert(op.id.clone()) {
                    operations.push(op);
                }
            }
        }

        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(operations.iter().map(StatusResponse::from).collect())
    }

    // ==========================================
    // 重试
    // ==========================================

    /// 重试为新操作（原操作不变）
    ///
    /// # 返回
    /// - Err(Conflict): 原操作未到终态，或记录集已不在内存
    /// - Err(InvalidInput): 下标未知或范围为空
    #[instrument(skip(self, request), fields(operation_id = %request.operation_id))]
    pub async fn retry(&self, request: RetryRequest) -> ApiResult<SubmitResponse> {
        let parent = match self.tracker.get_status(&request.operation_id) {
            Ok(op) => op,
            Err(EngineError::OperationNotFound(id)) => {
                return match self.find_archived(&id)? {
                    Some(_) => Err(EngineError::WorkSetUnavailable(id).into()),
                    None => Err(EngineError::OperationNotFound(id).into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let config = self.config.load_bulk_config().await?;
        let options = request
            .options
            .as_ref()
            .map(|o: &SubmitOptions| o.resolve(&parent.options));
        if let Some(options) = &options {
            options
                .check(config.max_chunk_size, config.max_concurrency_limit)
                .map_err(ApiError::InvalidInput)?;
        }

        let work_set = self
            .tracker
            .retry_work_set(&parent.id, &request.scope(), options)?;
        info!(
            parent_operation_id = %parent.id,
            retry_records = work_set.entries.len(),
            "重试批量操作"
        );
        self.launch(work_set, Some(parent.id), &config).await
    }

    // ==========================================
    // 结果下载
    // ==========================================

    /// 下载结果报表
    ///
    /// # 参数
    /// - format: 报表格式（csv / excel / json）
    /// - failures_only: 仅输出失败记录
    pub async fn download_results(
        &self,
        operation_id: &str,
        format: InputFormat,
        failures_only: bool,
    ) -> ApiResult<RenderedReport> {
        let (operation, details) = self.load_results(operation_id)?;
        Ok(ResultAggregator::render(&operation, &details, format, failures_only)?)
    }

    // ==========================================
    // 模板
    // ==========================================

    /// 可识别字段列表
    pub fn template(&self) -> Vec<TemplateField> {
        TEMPLATE_FIELDS
            .iter()
            .map(|(name, display_name, field_type, required, example)| TemplateField {
                name: name.to_string(),
                display_name: display_name.to_string(),
                field_type: field_type.to_string(),
                required: *required,
                example: example.to_string(),
            })
            .collect()
    }

    /// 模板 CSV（表头 + 示例行）
    pub fn template_csv(&self) -> ApiResult<Vec<u8>> {
        let fields = self.template();
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(fields.iter().map(|f| f.name.as_str()))
            .map_err(ImportError::from)?;
        writer
            .write_record(fields.iter().map(|f| f.example.as_str()))
            .map_err(ImportError::from)?;
        writer
            .into_inner()
            .map_err(|e| ApiError::InternalError(e.to_string()))
    }

    // ==========================================
    // 内部: 内存 / 归档读取
    // ==========================================

    fn find_archived(&self, operation_id: &str) -> ApiResult<Option<BulkOperation>> {
        match &self.archive {
            Some(archive) => Ok(archive.find_by_id(operation_id)?),
            None => Ok(None),
        }
    }

    fn load_operation(&self, operation_id: &str) -> ApiResult<BulkOperation> {
        match self.tracker.get_status(operation_id) {
            Ok(op) => Ok(op),
            Err(EngineError::OperationNotFound(id)) => self
                .find_archived(&id)?
                .ok_or_else(|| EngineError::OperationNotFound(id).into()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_results(&self, operation_id: &str) -> ApiResult<(BulkOperation, Vec<ProcessingDetail>)> {
        if self.tracker.contains(operation_id) {
            let operation = self.tracker.get_status(operation_id)?;
            let details = self.tracker.details(operation_id)?;
            if !operation.status.is_terminal() {
                warn!(operation_id, status = %operation.status, "操作未结束，下载的是部分结果");
            }
            return Ok((operation, details));
        }

        let operation = self
            .find_archived(operation_id)?
            .ok_or_else(|| EngineError::OperationNotFound(operation_id.to_string()))?;
        let details = match &self.archive {
            Some(archive) => archive.find_details(operation_id)?,
            None => Vec::new(),
        };
        Ok((operation, details))
    }
}

/// 预计完成时间: now + ceil(total / max_concurrency) × ms_per_record
fn estimate_completion(
    total_records: usize,
    max_concurrency: usize,
    ms_per_record: u64,
) -> Option<DateTime<Utc>> {
    let waves = total_records.div_ceil(max_concurrency.max(1)) as u64;
    let millis = i64::try_from(waves.saturating_mul(ms_per_record)).ok()?;
    Utc::now().checked_add_signed(Duration::try_milliseconds(millis)?)
}

/// 确定输入格式: 显式指定优先，其次文件扩展名
fn resolve_format(explicit: Option<InputFormat>, file_name: Option<&str>) -> ApiResult<InputFormat> {
    if let Some(format) = explicit {
        return Ok(format);
    }
    let Some(name) = file_name else {
        return Err(ApiError::InvalidInput(
            "input_format is required when no file name is given".to_string(),
        ));
    };
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    InputFormat::from_extension(ext)
        .ok_or_else(|| ImportError::UnsupportedFormat(ext.to_string()).into())
}
