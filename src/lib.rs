// ==========================================
// 农户批量入驻 - 核心库
// ==========================================
// 流程: 上传文件 → 解析 → 校验 → 去重 → 分块并发处理 → 结果汇总
// 技术栈: Rust + Tokio + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 去重 / 调度 / 处理 / 追踪 / 汇总
pub mod engine;

// 导入层 - 文件解析与校验
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 对外接口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    CredentialMethod, DeduplicationMode, DetailStatus, ErrorCode, InputFormat, OperationStatus,
    ProcessingMode, RecordAction,
};

// 领域实体
pub use domain::{
    BulkOperation, Farmer, NormalizedFarmerRecord, ProcessingDetail, ProcessingOptions,
    ValidationOutcome,
};

// 引擎
pub use engine::{ChunkScheduler, OperationTracker, RecordProcessor, ResultAggregator};

// API
pub use api::{ApiError, ApiResult, BulkApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "农户批量入驻";
