// ==========================================
// 农户批量入驻 - 本地协作方实现
// ==========================================
// 职责: 单机部署时的身份服务 / Kisan Sathi 分配 / 凭据下发
// 说明: 身份落在本地 identity_user 表；凭据仅记录日志，不落明文密码
// ==========================================

use crate::engine::collaborators::{
    CollaboratorError, CredentialChannel, CredentialDispatcher, CredentialMessage,
    IdentityRequest, IdentityResolution, IdentityService, KisanSathiAssigner,
};
use crate::repository::FarmerRepositoryImpl;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

// ==========================================
// LocalIdentityService - 本地身份服务
// ==========================================
pub struct LocalIdentityService {
    conn: Arc<Mutex<Connection>>,
}

impl LocalIdentityService {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl IdentityService for LocalIdentityService {
    async fn resolve_or_create(
        &self,
        request: &IdentityRequest,
    ) -> Result<IdentityResolution, CollaboratorError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CollaboratorError::Internal(format!("锁获取失败: {}", e)))?;
        let internal = |e: rusqlite::Error| CollaboratorError::Internal(e.to_string());

        let candidate = Uuid::new_v4().to_string();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO identity_user
                     (user_id, org_id, phone_number, email, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    candidate,
                    request.org_id,
                    request.phone_number,
                    request.email,
                    request.display_name,
                    Utc::now(),
                ],
            )
            .map_err(internal)?;

        if inserted == 1 {
            debug!(org_id = %request.org_id, user_id = %candidate, "新建身份");
            return Ok(IdentityResolution {
                user_id: candidate,
                created: true,
            });
        }

        let existing: Option<String> = conn
            .query_row(
                "SELECT user_id FROM identity_user WHERE org_id = ?1 AND phone_number = ?2",
                params![request.org_id, request.phone_number],
                |row| row.get(0),
            )
            .optional()
            .map_err(internal)?;

        existing
            .map(|user_id| IdentityResolution {
                user_id,
                created: false,
            })
            .ok_or_else(|| CollaboratorError::Internal("身份写入后无法读取".to_string()))
    }
}

// ==========================================
// RepositoryKisanSathiAssigner - 基于农户仓储的分配
// ==========================================
pub struct RepositoryKisanSathiAssigner {
    farmers: Arc<FarmerRepositoryImpl>,
}

impl RepositoryKisanSathiAssigner {
    pub fn new(farmers: Arc<FarmerRepositoryImpl>) -> Self {
        Self { farmers }
    }
}

#[async_trait]
impl KisanSathiAssigner for RepositoryKisanSathiAssigner {
    async fn assign(
        &self,
        org_id: &str,
        farmer_id: &str,
        kisan_sathi_user_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.farmers
            .assign_kisan_sathi(farmer_id, kisan_sathi_user_id, org_id)
            .map_err(|e| CollaboratorError::Internal(e.to_string()))
    }
}

// ==========================================
// LoggingCredentialDispatcher - 日志凭据下发
// ==========================================
#[derive(Default)]
pub struct LoggingCredentialDispatcher {
    sent: AtomicUsize,
}

impl LoggingCredentialDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已下发条数
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialDispatcher for LoggingCredentialDispatcher {
    async fn send(
        &self,
        channel: CredentialChannel,
        message: &CredentialMessage,
    ) -> Result<(), CollaboratorError> {
        let destination = match channel {
            CredentialChannel::Sms => Some(message.phone_number.as_str()),
            CredentialChannel::Email => message.email.as_deref(),
        };
        let Some(destination) = destination else {
            return Err(CollaboratorError::Rejected(format!("缺少{}接收地址", channel)));
        };

        self.sent.fetch_add(1, Ordering::SeqCst);
        info!(
            channel = %channel,
            farmer_id = %message.farmer_id,
            username = %message.username,
            destination,
            "凭据已下发"
        );
        Ok(())
    }
}
