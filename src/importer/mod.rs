// ==========================================
// 农户批量入驻 - 导入层
// ==========================================
// 职责: 上传字节 → 规范化记录 → 单条校验
// 支持: CSV, Excel, JSON
// 红线: 解析全有或全无；单条记录的容错属于校验，不属于解析
// ==========================================

// 模块声明
pub mod data_cleaner;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod importer_trait;
pub mod validator;

// 重导出核心类型
pub use data_cleaner::DataCleaner as DataCleanerImpl;
pub use error::{ImportError, ImportResult};
pub use field_mapper::{FieldMapper as FieldMapperImpl, KNOWN_FIELDS, REQUIRED_HEADERS};
pub use file_parser::{
    detect_delimiter, CsvParser, ExcelParser, JsonParser, UniversalFileParser, DEFAULT_MAX_RECORDS,
};
pub use validator::{ValidatorImpl, DEFAULT_COUNTRY};

// 重导出 Trait 接口
pub use importer_trait::{DataCleaner, FieldMapper, FileParser, RawSheet, RecordValidator};
