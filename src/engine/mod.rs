// ==========================================
// 农户批量入驻 - 引擎层
// ==========================================
// 职责: 去重 → 分块调度 → 单条处理 → 进度追踪 → 结果汇总
// 红线: Engine 不拼 SQL，数据访问经由 Repository
// ==========================================

pub mod aggregator;
pub mod collaborators;
pub mod deduplicator;
pub mod error;
pub mod processor;
pub mod scheduler;
pub mod tracker;

// 重导出核心引擎
pub use aggregator::{RenderedReport, ResultAggregator, ResultSummary, REPORT_COLUMNS};
pub use collaborators::{
    CollaboratorError, CredentialChannel, CredentialDispatcher, CredentialMessage,
    IdentityRequest, IdentityResolution, IdentityService, KisanSathiAssigner,
};
pub use deduplicator::{ClaimSet, DedupDecision, Deduplicator};
pub use error::{EngineError, EngineResult};
pub use processor::{RecordJob, RecordProcessor, RecordRoute};
pub use scheduler::ChunkScheduler;
pub use tracker::{OperationTracker, TrackedOperation};
