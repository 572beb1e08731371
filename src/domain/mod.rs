// ==========================================
// 农户批量入驻 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含调度逻辑
// ==========================================

pub mod farmer;
pub mod operation;
pub mod types;

// 重导出核心类型
pub use farmer::{Farmer, FarmerAddress, FarmerProfile, NewFarmer, NormalizedFarmerRecord};
pub use operation::{
    total_batches, AncillaryOutcome, BulkOperation, OperationWorkSet, ProcessingDetail,
    ProcessingOptions, RetryScope, ValidationOutcome, WorkEntry,
};
pub use types::{
    CredentialMethod, DeduplicationMode, DetailStatus, ErrorCode, InputFormat, OperationStatus,
    ProcessingMode, RecordAction,
};
