// ==========================================
// 农户批量入驻 - 单条记录处理器（Worker）
// ==========================================
// 流程（创建）: 身份解析/创建 → 创建农户 → [分配 Kisan Sathi] → [下发凭据]
// 流程（更新）: 更新农户 → [分配 Kisan Sathi]
// 红线: 前两步失败为终态 FAILED；附属动作失败只降级元数据，不翻转 SUCCESS
// 红线: 每次外部调用单独超时，超时即单条 FAILED/TIMEOUT
// ==========================================

use crate::domain::farmer::{FarmerProfile, NewFarmer};
use crate::domain::operation::{AncillaryOutcome, ProcessingDetail, ProcessingOptions, WorkEntry};
use crate::domain::types::{ErrorCode, RecordAction};
use crate::engine::collaborators::{
    CredentialChannel, CredentialDispatcher, CredentialMessage, IdentityRequest, IdentityService,
    KisanSathiAssigner,
};
use crate::repository::farmer_repo::FarmerRepository;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// 生成的临时密码长度
const TEMP_PASSWORD_LEN: usize = 12;

// ==========================================
// RecordJob - 派发给 Worker 的单条任务
// ==========================================
#[derive(Debug, Clone)]
pub enum RecordRoute {
    Create,
    Update { farmer_id: String },
}

#[derive(Debug, Clone)]
pub struct RecordJob {
    pub org_id: String,
    pub entry: WorkEntry,
    pub route: RecordRoute,
    pub options: Arc<ProcessingOptions>,
}

// 外部调用失败原因
enum CallFailure {
    TimedOut,
    Failed(String),
}

// ==========================================
// RecordProcessor
// ==========================================
pub struct RecordProcessor {
    identity: Arc<dyn IdentityService>,
    farmers: Arc<dyn FarmerRepository>,
    assigner: Arc<dyn KisanSathiAssigner>,
    credentials: Arc<dyn CredentialDispatcher>,
    call_timeout: Duration,
}

impl RecordProcessor {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        farmers: Arc<dyn FarmerRepository>,
        assigner: Arc<dyn KisanSathiAssigner>,
        credentials: Arc<dyn CredentialDispatcher>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            farmers,
            assigner,
            credentials,
            call_timeout,
        }
    }

    /// 带超时执行一次外部调用
    async fn guarded<T, E, F>(&self, call: F) -> Result<T, CallFailure>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Err(_) => Err(CallFailure::TimedOut),
            Ok(Err(e)) => Err(CallFailure::Failed(e.to_string())),
            Ok(Ok(v)) => Ok(v),
        }
    }

    fn failure_detail(
        &self,
        entry: &WorkEntry,
        step: &str,
        code: ErrorCode,
        failure: CallFailure,
    ) -> ProcessingDetail {
        let (code, message) = match failure {
            CallFailure::TimedOut => (
                ErrorCode::Timeout,
                format!("{} timed out after {} ms", step, self.call_timeout.as_millis()),
            ),
            CallFailure::Failed(msg) => (code, format!("{} failed: {}", step, msg)),
        };
        ProcessingDetail::failed(
            entry.record.record_index,
            entry.record.external_id.clone(),
            code,
            message,
            entry.retry_count,
        )
    }

    fn temporary_password(entry: &WorkEntry) -> String {
        entry.record.password.clone().unwrap_or_else(|| {
            Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(TEMP_PASSWORD_LEN)
                .collect()
        })
    }

    /// 处理单条记录，始终返回一份明细
    pub async fn process(&self, job: RecordJob) -> ProcessingDetail {
        debug!(
            record_index = job.entry.record.record_index,
            org_id = %job.org_id,
            "开始处理记录"
        );

        match job.route.clone() {
            RecordRoute::Create => self.process_create(&job).await,
            RecordRoute::Update { farmer_id } => self.process_update(&job, &farmer_id).await,
        }
    }

    async fn process_create(&self, job: &RecordJob) -> ProcessingDetail {
        let entry = &job.entry;
        let record = &entry.record;
        let password = Self::temporary_password(entry);

        // (a) 身份解析/创建
        let request = IdentityRequest {
            org_id: job.org_id.clone(),
            phone_number: record.phone_number.clone(),
            email: record.email.clone(),
            display_name: record.full_name(),
            password: password.clone(),
        };
        let identity = match self.guarded(self.identity.resolve_or_create(&request)).await {
            Ok(identity) => identity,
            Err(failure) => {
                return self.failure_detail(entry, "identity", ErrorCode::IdentityFailed, failure)
            }
        };

        // (b) 创建农户
        let new_farmer = NewFarmer {
            org_id: job.org_id.clone(),
            user_id: identity.user_id.clone(),
            profile: FarmerProfile::from_record(record),
        };
        let farmer = match self.guarded(self.farmers.create(new_farmer)).await {
            Ok(farmer) => farmer,
            Err(failure) => {
                return self.failure_detail(
                    entry,
                    "farmer create",
                    ErrorCode::FarmerCreateFailed,
                    failure,
                )
            }
        };

        let mut detail = ProcessingDetail::success(
            record.record_index,
            record.external_id.clone(),
            farmer.farmer_id.clone(),
            RecordAction::Created,
            entry.retry_count,
        );

        // (c) 分配 Kisan Sathi
        detail.kisan_sathi = self.assign_kisan_sathi(job, &farmer.farmer_id).await;

        // (d) 下发凭据（仅新建身份）
        if job.options.send_credentials && identity.created {
            let message = CredentialMessage {
                org_id: job.org_id.clone(),
                farmer_id: farmer.farmer_id.clone(),
                user_id: identity.user_id,
                username: record.phone_number.clone(),
                phone_number: record.phone_number.clone(),
                email: record.email.clone(),
                temporary_password: password,
            };
            detail.credentials = self.dispatch_credentials(job, &message).await;
        }

        detail
    }

    async fn process_update(&self, job: &RecordJob, farmer_id: &str) -> ProcessingDetail {
        let entry = &job.entry;
        let record = &entry.record;

        let profile = FarmerProfile::from_record(record);
        let farmer = match self.guarded(self.farmers.update(farmer_id, profile)).await {
            Ok(farmer) => farmer,
            Err(failure) => {
                return self.failure_detail(
                    entry,
                    "farmer update",
                    ErrorCode::FarmerUpdateFailed,
                    failure,
                )
            }
        };

        let mut detail = ProcessingDetail::success(
            record.record_index,
            record.external_id.clone(),
            farmer.farmer_id.clone(),
            RecordAction::Updated,
            entry.retry_count,
        );
        detail.kisan_sathi = self.assign_kisan_sathi(job, &farmer.farmer_id).await;
        detail
    }

    async fn assign_kisan_sathi(&self, job: &RecordJob, farmer_id: &str) -> AncillaryOutcome {
        if !job.options.assign_kisan_sathi {
            return AncillaryOutcome::not_attempted();
        }
        let Some(kisan_sathi_id) = job.options.kisan_sathi_user_id.as_deref() else {
            return AncillaryOutcome::failed("kisan_sathi_user_id is not set");
        };

        match self
            .guarded(self.assigner.assign(&job.org_id, farmer_id, kisan_sathi_id))
            .await
        {
            Ok(()) => AncillaryOutcome::succeeded(),
            Err(failure) => {
                let message = match failure {
                    CallFailure::TimedOut => "kisan sathi assignment timed out".to_string(),
                    CallFailure::Failed(msg) => format!("kisan sathi assignment failed: {}", msg),
                };
                warn!(
                    record_index = job.entry.record.record_index,
                    farmer_id,
                    error = %message,
                    "Kisan Sathi 分配失败（不影响记录结果）"
                );
                AncillaryOutcome::failed(message)
            }
        }
    }

    async fn dispatch_credentials(
        &self,
        job: &RecordJob,
        message: &CredentialMessage,
    ) -> AncillaryOutcome {
        let method = job.options.credential_method;
        let mut channels = Vec::with_capacity(2);
        if method.includes_sms() {
            channels.push(CredentialChannel::Sms);
        }
        if method.includes_email() {
            channels.push(CredentialChannel::Email);
        }

        let mut errors = Vec::new();
        for channel in channels {
            if channel == CredentialChannel::Email && message.email.is_none() {
                errors.push("email: no email address on record".to_string());
                continue;
            }
            match self.guarded(self.credentials.send(channel, message)).await {
                Ok(()) => {}
                Err(CallFailure::TimedOut) => errors.push(format!("{}: timed out", channel)),
                Err(CallFailure::Failed(msg)) => errors.push(format!("{}: {}", channel, msg)),
            }
        }

        if errors.is_empty() {
            AncillaryOutcome::succeeded()
        } else {
            warn!(
                record_index = job.entry.record.record_index,
                errors = ?errors,
                "凭据下发失败（不影响记录结果）"
            );
            AncillaryOutcome::failed(errors.join("; "))
        }
    }
}
