// ==========================================
// 农户批量入驻 - API 层
// ==========================================
// 职责: 对外接口门面，供 CLI / 上层服务调用
// ==========================================

pub mod bulk_api;
pub mod dto;
pub mod error;

// 重导出核心类型
pub use bulk_api::BulkApi;
pub use dto::{
    ProgressView, RetryRequest, StatusResponse, SubmitOptions, SubmitRequest, SubmitResponse,
    TemplateField,
};
pub use error::{ApiError, ApiResult};
