// ==========================================
// 农户批量入驻 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 解析错误均为致命错误，在调度前同步返回给提交方
// ==========================================

use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件格式不支持: {0}（仅支持 csv / excel / json）")]
    UnsupportedFormat(String),

    #[error("文件过大: {size} 字节，上限 {limit} 字节")]
    FileTooLarge { size: usize, limit: usize },

    #[error("文件为空")]
    EmptyFile,

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("JSON 解析失败: {0}")]
    JsonParseError(String),

    // ===== 结构性错误 =====
    #[error("缺少必填列: {}", .0.join(", "))]
    MissingRequiredHeaders(Vec<String>),

    #[error("记录数超限: {count} 条，上限 {limit} 条")]
    TooManyRecords { count: usize, limit: usize },

    #[error("文件中没有有效数据行")]
    NoRecords,

    // ===== 报表错误 =====
    #[error("结果报表生成失败: {0}")]
    ReportRenderError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

// 实现 From<serde_json::Error>
impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::JsonParseError(err.to_string())
    }
}

// 实现 From<rust_xlsxwriter::XlsxError>
impl From<rust_xlsxwriter::XlsxError> for ImportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ImportError::ReportRenderError(err.to_string())
    }
}

impl ImportError {
    /// 稳定的机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ImportError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ImportError::EmptyFile => "EMPTY_FILE",
            ImportError::MissingRequiredHeaders(_) => "MISSING_HEADERS",
            ImportError::TooManyRecords { .. } => "TOO_MANY_RECORDS",
            ImportError::NoRecords => "NO_RECORDS",
            ImportError::ReportRenderError(_) => "REPORT_ERROR",
            ImportError::InternalError(_) | ImportError::Other(_) => "INTERNAL_ERROR",
            _ => "PARSE_ERROR",
        }
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
