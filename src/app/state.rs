// ==========================================
// 农户批量入驻 - 应用状态
// ==========================================
// 职责: 打开数据库，装配仓储 / 引擎 / API 实例
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::BulkApi;
use crate::app::local_services::{
    LocalIdentityService, LoggingCredentialDispatcher, RepositoryKisanSathiAssigner,
};
use crate::config::{BulkConfigReader, ConfigManager};
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::{
    ChunkScheduler, CredentialDispatcher, Deduplicator, IdentityService, KisanSathiAssigner,
    OperationTracker, RecordProcessor,
};
use crate::repository::{BulkOperationRepository, FarmerRepository, FarmerRepositoryImpl};

/// 应用状态
///
/// 持有共享连接与各层实例，CLI 与测试共用同一装配
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 批量操作API
    pub bulk_api: Arc<BulkApi>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 农户仓储
    pub farmer_repo: Arc<FarmerRepositoryImpl>,

    /// 批量操作归档仓储
    pub operation_repo: Arc<BulkOperationRepository>,

    /// 操作追踪器
    pub tracker: Arc<OperationTracker>,
}

impl AppState {
    /// 创建新的AppState实例（本地协作方）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub async fn new(db_path: String) -> Result<Self, String> {
        Self::build(db_path, None).await
    }

    /// 使用外部协作方装配（身份 / 分配 / 凭据）
    pub async fn with_collaborators(
        db_path: String,
        identity: Arc<dyn IdentityService>,
        assigner: Arc<dyn KisanSathiAssigner>,
        credentials: Arc<dyn CredentialDispatcher>,
    ) -> Result<Self, String> {
        Self::build(db_path, Some((identity, assigner, credentials))).await
    }

    async fn build(
        db_path: String,
        collaborators: Option<(
            Arc<dyn IdentityService>,
            Arc<dyn KisanSathiAssigner>,
            Arc<dyn CredentialDispatcher>,
        )>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        // 创建数据库连接（共享连接）并建表
        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库初始化失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let farmer_repo = Arc::new(FarmerRepositoryImpl::from_connection(conn.clone()));
        let operation_repo = Arc::new(BulkOperationRepository::from_connection(conn.clone()));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config = config_manager
            .load_bulk_config()
            .await
            .map_err(|e| format!("读取批量配置失败: {}", e))?;
        let call_timeout = Duration::from_millis(config.call_timeout_ms);

        // ==========================================
        // 协作方
        // ==========================================
        let (identity, assigner, credentials) = match collaborators {
            Some(c) => c,
            None => (
                Arc::new(LocalIdentityService::new(conn.clone())) as Arc<dyn IdentityService>,
                Arc::new(RepositoryKisanSathiAssigner::new(farmer_repo.clone()))
                    as Arc<dyn KisanSathiAssigner>,
                Arc::new(LoggingCredentialDispatcher::new()) as Arc<dyn CredentialDispatcher>,
            ),
        };

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let farmers: Arc<dyn FarmerRepository> = farmer_repo.clone();
        let tracker = Arc::new(OperationTracker::with_retention(config.retained_operations));
        let processor = Arc::new(RecordProcessor::new(
            identity,
            farmers.clone(),
            assigner,
            credentials,
            call_timeout,
        ));
        let deduplicator = Arc::new(Deduplicator::new(farmers, call_timeout));
        let scheduler = Arc::new(ChunkScheduler::new(
            tracker.clone(),
            processor,
            deduplicator,
            Some(operation_repo.clone()),
            config.api_base_path.clone(),
        ));

        // ==========================================
        // 创建API实例
        // ==========================================
        let bulk_api = Arc::new(BulkApi::new(
            config_manager.clone(),
            scheduler,
            Some(operation_repo.clone()),
        ));

        tracing::info!(
            chunk_size = config.default_chunk_size,
            max_concurrency = config.default_max_concurrency,
            call_timeout_ms = config.call_timeout_ms,
            retained_operations = config.retained_operations,
            "AppState初始化完成"
        );

        Ok(Self {
            db_path,
            bulk_api,
            config_manager,
            farmer_repo,
            operation_repo,
            tracker,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 FARMER_ONBOARDING_DB_PATH → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("FARMER_ONBOARDING_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./farmer_onboarding.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("farmer-onboarding");
        // 目录创建失败时回落到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("farmer_onboarding.db");
        }
    }

    path.to_string_lossy().to_string()
}
