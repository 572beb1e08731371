// ==========================================
// 农户批量入驻 - 导入管道 Trait
// ==========================================
// 职责: 定义解析 / 映射 / 清洗 / 校验接口（不包含实现）
// 流程: 字节 → RawSheet → NormalizedFarmerRecord → ValidationOutcome
// ==========================================

use crate::domain::farmer::NormalizedFarmerRecord;
use crate::domain::operation::ValidationOutcome;
use crate::importer::error::ImportResult;
use std::collections::HashMap;

// ==========================================
// RawSheet - 解析器原始输出
// ==========================================
// headers: 原始表头（未规范化）
// rows: 非空行，列名 → 单元格文本
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 文件解析接口（阶段 0）
// 实现者: CsvParser, ExcelParser, JsonParser
pub trait FileParser: Send + Sync {
    /// 解析字节内容为原始行记录
    ///
    /// # 返回
    /// - Ok(RawSheet): 表头 + 非空行
    /// - Err: 格式错误
    fn parse_to_raw_sheet(&self, data: &[u8]) -> ImportResult<RawSheet>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// 用途: 字段映射接口（阶段 1）
// 实现者: FieldMapperImpl
pub trait FieldMapper: Send + Sync {
    /// 规范化表头（lower_snake_case + 别名解析）
    fn normalize_header(&self, header: &str) -> String;

    /// 将已规范化表头的行映射为 NormalizedFarmerRecord
    ///
    /// # 参数
    /// - row: 规范化列名 → 单元格文本
    /// - record_index: 记录下标
    fn map_to_record(
        &self,
        row: &HashMap<String, String>,
        record_index: usize,
    ) -> NormalizedFarmerRecord;
}

// ==========================================
// DataCleaner Trait
// ==========================================
// 用途: 数据清洗接口（阶段 2）
// 实现者: DataCleanerImpl
pub trait DataCleaner: Send + Sync {
    /// 标准化 NULL 值（空字符串/空白 → None）
    fn normalize_null(&self, value: Option<String>) -> Option<String>;

    /// 规范化手机号（去非数字字符 + 折叠国家码）
    ///
    /// 不合法的结果原样保留，由校验器拒绝
    fn normalize_phone(&self, value: &str) -> String;

    /// 规范化日期（8 位纯数字 → YYYY-MM-DD，其它原样透传）
    fn normalize_date(&self, value: &str) -> String;
}

// ==========================================
// RecordValidator Trait
// ==========================================
// 用途: 单条记录校验接口（阶段 3）
// 实现者: ValidatorImpl
pub trait RecordValidator: Send + Sync {
    /// 校验记录
    fn validate(&self, record: &NormalizedFarmerRecord) -> ValidationOutcome;

    /// 补全默认值（仅在校验通过后调用）
    ///
    /// # 返回
    /// - 新的记录副本（原记录不可变）
    fn apply_defaults(&self, record: &NormalizedFarmerRecord) -> NormalizedFarmerRecord;
}
