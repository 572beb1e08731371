// ==========================================
// 农户批量入驻 - 外部协作方接口
// ==========================================
// 职责: 身份服务 / Kisan Sathi 分配 / 凭据下发 的接口定义
// 说明: 生产实现位于外部服务，本地实现见 app::local_services
// ==========================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 协作方调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("服务不可用: {0}")]
    Unavailable(String),

    #[error("请求被拒绝: {0}")]
    Rejected(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

// ==========================================
// 身份服务
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequest {
    pub org_id: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResolution {
    pub user_id: String,
    pub created: bool, // true: 本次新建；false: 已存在
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// 按 (org_id, phone_number) 解析身份，不存在则创建
    async fn resolve_or_create(
        &self,
        request: &IdentityRequest,
    ) -> Result<IdentityResolution, CollaboratorError>;
}

// ==========================================
// Kisan Sathi 分配
// ==========================================
#[async_trait]
pub trait KisanSathiAssigner: Send + Sync {
    async fn assign(
        &self,
        org_id: &str,
        farmer_id: &str,
        kisan_sathi_user_id: &str,
    ) -> Result<(), CollaboratorError>;
}

// ==========================================
// 凭据下发
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialChannel {
    Sms,
    Email,
}

impl fmt::Display for CredentialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialChannel::Sms => write!(f, "sms"),
            CredentialChannel::Email => write!(f, "email"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialMessage {
    pub org_id: String,
    pub farmer_id: String,
    pub user_id: String,
    pub username: String, // 登录名 = 手机号
    pub phone_number: String,
    pub email: Option<String>,
    pub temporary_password: String,
}

#[async_trait]
pub trait CredentialDispatcher: Send + Sync {
    async fn send(
        &self,
        channel: CredentialChannel,
        message: &CredentialMessage,
    ) -> Result<(), CollaboratorError>;
}
