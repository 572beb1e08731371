// ==========================================
// 农户批量入驻 - 文件解析器实现
// ==========================================
// 阶段 0: 字节 → RawSheet（CSV / Excel / JSON）
// 阶段 1: 表头规范化 + 必填列检查 + 记录数检查 + 字段映射
// 红线: 解析全有或全无，任何结构性错误在派发前直接失败
// ==========================================

use crate::domain::farmer::NormalizedFarmerRecord;
use crate::domain::types::InputFormat;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{FieldMapper, REQUIRED_HEADERS};
use crate::importer::importer_trait::{FieldMapper as _, FileParser, RawSheet};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::Timelike;
use csv::ReaderBuilder;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use tracing::{debug, info, warn};

/// 默认记录数上限
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// 分隔符探测窗口（字节）
const DELIMITER_SNIFF_BYTES: usize = 1000;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

/// 按前 1000 字节中的出现次数选择分隔符（',' / ';' / '\t'）
///
/// 平票或都未出现时回落到逗号
pub fn detect_delimiter(data: &[u8]) -> u8 {
    let window = &data[..data.len().min(DELIMITER_SNIFF_BYTES)];
    let count = |d: u8| window.iter().filter(|&&b| b == d).count();

    let candidates = [(b',', count(b',')), (b';', count(b';')), (b'\t', count(b'\t'))];
    let max = candidates.iter().map(|(_, c)| *c).max().unwrap_or(0);
    if max == 0 {
        return b',';
    }

    let winners: Vec<u8> = candidates
        .iter()
        .filter(|(_, c)| *c == max)
        .map(|(d, _)| *d)
        .collect();
    if winners.len() == 1 {
        winners[0]
    } else {
        b','
    }
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse_to_raw_sheet(&self, data: &[u8]) -> ImportResult<RawSheet> {
        let data = strip_bom(data);
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ImportError::EmptyFile);
        }

        let delimiter = detect_delimiter(data);
        debug!(delimiter = %(delimiter as char).escape_default(), "CSV 分隔符探测完成");

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .flexible(true) // 允许行长度不一致
            .from_reader(data);

        // 读取表头
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        // 读取所有行
        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut row_map = HashMap::new();

            for (col_idx, value) in record.iter().enumerate() {
                if let Some(header) = headers.get(col_idx) {
                    row_map.insert(header.clone(), value.trim().to_string());
                }
            }

            // 跳过完全空白的行
            if row_map.values().all(|v| v.is_empty()) {
                continue;
            }

            rows.push(row_map);
        }

        Ok(RawSheet { headers, rows })
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl ExcelParser {
    /// 单元格 → 文本（整数值浮点去掉 ".0"，避免手机号被读成 9876543210.0）
    ///
    /// 日期格式单元格输出 YYYY-MM-DD（带时间时为 YYYY-MM-DD HH:MM:SS）
    fn cell_to_string(cell: &Data) -> String {
        match cell {
            Data::Empty => String::new(),
            Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
            Data::Int(i) => i.to_string(),
            Data::DateTime(dt) if !dt.is_duration() => match dt.as_datetime() {
                Some(ndt) if ndt.num_seconds_from_midnight() == 0 => {
                    ndt.format("%Y-%m-%d").to_string()
                }
                Some(ndt) => ndt.format("%Y-%m-%d %H:%M:%S").to_string(),
                None => dt.as_f64().to_string(),
            },
            Data::DateTimeIso(s) => s.trim().to_string(),
            other => other.to_string().trim().to_string(),
        }
    }
}

impl FileParser for ExcelParser {
    fn parse_to_raw_sheet(&self, data: &[u8]) -> ImportResult<RawSheet> {
        if data.is_empty() {
            return Err(ImportError::EmptyFile);
        }

        // 自动识别 xlsx / xls / ods
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
            .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;

        // 读取第一个 sheet
        let sheet_names = workbook.sheet_names();
        let sheet_name = sheet_names
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;

        // 提取表头（第一行）
        let mut rows_iter = range.rows();
        let header_row = rows_iter.next().ok_or(ImportError::EmptyFile)?;

        let headers: Vec<String> = header_row
            .iter()
            .map(|cell| Self::cell_to_string(cell).trim().to_string())
            .collect();

        // 读取数据行
        let mut rows = Vec::new();
        for data_row in rows_iter {
            let mut row_map = HashMap::new();

            for (col_idx, cell) in data_row.iter().enumerate() {
                if let Some(header) = headers.get(col_idx) {
                    if header.is_empty() {
                        continue;
                    }
                    row_map.insert(header.clone(), Self::cell_to_string(cell));
                }
            }

            // 跳过完全空白的行
            if row_map.values().all(|v| v.is_empty()) {
                continue;
            }

            rows.push(row_map);
        }

        Ok(RawSheet { headers, rows })
    }
}

// ==========================================
// JSON Parser 实现
// ==========================================
// 支持: 顶层数组，或 {"farmers": [...]} / {"records": [...]}
pub struct JsonParser;

impl JsonParser {
    fn scalar_to_string(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }
    }
}

impl FileParser for JsonParser {
    fn parse_to_raw_sheet(&self, data: &[u8]) -> ImportResult<RawSheet> {
        let data = strip_bom(data);
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ImportError::EmptyFile);
        }

        let root: Value = serde_json::from_slice(data)?;
        let items = match root {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("farmers").or_else(|| obj.remove("records")) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(ImportError::JsonParseError(
                        "期望顶层数组，或包含 farmers / records 数组的对象".to_string(),
                    ))
                }
            },
            _ => {
                return Err(ImportError::JsonParseError(
                    "期望顶层数组或对象".to_string(),
                ))
            }
        };

        // 表头取所有对象键的并集（保持首次出现顺序）
        let mut headers: Vec<String> = Vec::new();
        let mut rows = Vec::new();

        for (idx, item) in items.into_iter().enumerate() {
            let Value::Object(obj) = item else {
                return Err(ImportError::JsonParseError(format!(
                    "第 {} 个元素不是对象",
                    idx + 1
                )));
            };

            let mut row_map = HashMap::new();
            for (key, value) in obj {
                match value {
                    // 嵌套地址对象展开为地址字段
                    Value::Object(inner) if key.eq_ignore_ascii_case("address") => {
                        for (inner_key, inner_value) in inner {
                            if !headers.contains(&inner_key) {
                                headers.push(inner_key.clone());
                            }
                            row_map.insert(inner_key, Self::scalar_to_string(&inner_value));
                        }
                    }
                    other => {
                        if !headers.contains(&key) {
                            headers.push(key.clone());
                        }
                        row_map.insert(key, Self::scalar_to_string(&other));
                    }
                }
            }

            // 跳过完全空白的对象
            if row_map.values().all(|v| v.is_empty()) {
                continue;
            }

            rows.push(row_map);
        }

        Ok(RawSheet { headers, rows })
    }
}

// ==========================================
// 通用文件解析器（FormatParser 门面）
// ==========================================
pub struct UniversalFileParser {
    field_mapper: FieldMapper,
    max_records: usize,
}

impl UniversalFileParser {
    pub fn new(max_records: usize) -> Self {
        Self {
            field_mapper: FieldMapper::new(),
            max_records,
        }
    }

    pub fn parse_csv(&self, data: &[u8]) -> ImportResult<Vec<NormalizedFarmerRecord>> {
        self.parse(InputFormat::Csv, data)
    }

    pub fn parse_excel(&self, data: &[u8]) -> ImportResult<Vec<NormalizedFarmerRecord>> {
        self.parse(InputFormat::Excel, data)
    }

    pub fn parse_json(&self, data: &[u8]) -> ImportResult<Vec<NormalizedFarmerRecord>> {
        self.parse(InputFormat::Json, data)
    }

    /// 解析为规范化记录
    ///
    /// # 返回
    /// - Ok(Vec<NormalizedFarmerRecord>): 全部记录（至少 1 条，至多 max_records 条）
    /// - Err: 缺少必填列 / 记录数超限 / 无数据行 / 格式错误
    pub fn parse(
        &self,
        format: InputFormat,
        data: &[u8],
    ) -> ImportResult<Vec<NormalizedFarmerRecord>> {
        let sheet = match format {
            InputFormat::Csv => CsvParser.parse_to_raw_sheet(data)?,
            InputFormat::Excel => ExcelParser.parse_to_raw_sheet(data)?,
            InputFormat::Json => JsonParser.parse_to_raw_sheet(data)?,
        };

        self.map_sheet(sheet)
    }

    fn map_sheet(&self, sheet: RawSheet) -> ImportResult<Vec<NormalizedFarmerRecord>> {
        // 表头规范化: 原始列名 → 标准列名
        let header_map: HashMap<String, String> = sheet
            .headers
            .iter()
            .map(|h| (h.clone(), self.field_mapper.normalize_header(h)))
            .collect();

        let present: BTreeSet<&str> = header_map.values().map(String::as_str).collect();
        let missing: Vec<String> = REQUIRED_HEADERS
            .iter()
            .filter(|h| !present.contains(**h))
            .map(|h| h.to_string())
            .collect();
        if !missing.is_empty() {
            warn!(missing = ?missing, "缺少必填列");
            return Err(ImportError::MissingRequiredHeaders(missing));
        }

        let count = sheet.rows.len();
        if count > self.max_records {
            warn!(count, limit = self.max_records, "记录数超限");
            return Err(ImportError::TooManyRecords {
                count,
                limit: self.max_records,
            });
        }
        if count == 0 {
            return Err(ImportError::NoRecords);
        }

        let records: Vec<NormalizedFarmerRecord> = sheet
            .rows
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| {
                // 同名规范列取第一个非空值
                let mut normalized: HashMap<String, String> = HashMap::with_capacity(raw.len());
                for (key, value) in raw {
                    let name = header_map
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| self.field_mapper.normalize_header(&key));
                    let slot = normalized.entry(name).or_default();
                    if slot.is_empty() {
                        *slot = value;
                    }
                }
                self.field_mapper.map_to_record(&normalized, idx)
            })
            .collect();

        info!(records = records.len(), "文件解析完成");
        Ok(records)
    }
}

impl Default for UniversalFileParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}
