// ==========================================
// 农户批量入驻 - 结果汇总器
// ==========================================
// 职责: 明细分组（成功/失败/跳过）+ 错误码直方图 + 结果报表渲染（CSV/Excel/JSON）
// 报表: 按 record_index 升序，可仅输出失败记录
// ==========================================

use crate::domain::operation::{AncillaryOutcome, BulkOperation, ProcessingDetail};
use crate::domain::types::{DetailStatus, InputFormat};
use crate::importer::error::{ImportError, ImportResult};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::collections::BTreeMap;

/// 报表列
pub const REPORT_COLUMNS: [&str; 11] = [
    "record_index",
    "external_id",
    "status",
    "action",
    "farmer_id",
    "error_code",
    "error",
    "retry_count",
    "processed_at",
    "kisan_sathi_assigned",
    "credentials_sent",
];

// ==========================================
// ResultSummary - 汇总计数
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error_histogram: BTreeMap<String, usize>, // 错误码 → 条数
}

impl ResultSummary {
    /// 错误摘要，如 "3 record(s) failed: DUPLICATE=1, VALIDATION=2"
    pub fn error_summary(&self) -> Option<String> {
        if self.failed == 0 {
            return None;
        }
        let histogram = self
            .error_histogram
            .iter()
            .map(|(code, n)| format!("{}={}", code, n))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("{} record(s) failed: {}", self.failed, histogram))
    }
}

/// 明细分组
#[derive(Debug, Default)]
pub struct PartitionedResults<'a> {
    pub successful: Vec<&'a ProcessingDetail>,
    pub failed: Vec<&'a ProcessingDetail>,
    pub skipped: Vec<&'a ProcessingDetail>,
}

/// 渲染后的报表文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

// JSON 报表结构
#[derive(Serialize)]
struct JsonReport<'a> {
    operation_id: &'a str,
    status: String,
    failures_only: bool,
    summary: &'a ResultSummary,
    records: Vec<ReportRow>,
}

#[derive(Debug, Clone, Serialize)]
struct ReportRow {
    record_index: usize,
    external_id: String,
    status: String,
    action: String,
    farmer_id: String,
    error_code: String,
    error: String,
    retry_count: u32,
    processed_at: String,
    kisan_sathi_assigned: String,
    credentials_sent: String,
}

impl ReportRow {
    fn from_detail(detail: &ProcessingDetail) -> Self {
        Self {
            record_index: detail.record_index,
            external_id: detail.external_id.clone().unwrap_or_default(),
            status: detail.status.to_db_str().to_string(),
            action: detail
                .action
                .map(|a| a.to_db_str().to_string())
                .unwrap_or_default(),
            farmer_id: detail.farmer_id.clone().unwrap_or_default(),
            error_code: detail
                .error_code
                .map(|c| c.to_db_str().to_string())
                .unwrap_or_default(),
            error: detail.error.clone().unwrap_or_default(),
            retry_count: detail.retry_count,
            processed_at: detail.processed_at.to_rfc3339(),
            kisan_sathi_assigned: ancillary_cell(&detail.kisan_sathi),
            credentials_sent: ancillary_cell(&detail.credentials),
        }
    }

    fn cells(&self) -> [String; 11] {
        [
            self.record_index.to_string(),
            self.external_id.clone(),
            self.status.clone(),
            self.action.clone(),
            self.farmer_id.clone(),
            self.error_code.clone(),
            self.error.clone(),
            self.retry_count.to_string(),
            self.processed_at.clone(),
            self.kisan_sathi_assigned.clone(),
            self.credentials_sent.clone(),
        ]
    }
}

// 未尝试 → 空；否则 true/false
fn ancillary_cell(outcome: &AncillaryOutcome) -> String {
    if outcome.attempted {
        outcome.succeeded.to_string()
    } else {
        String::new()
    }
}

// ==========================================
// ResultAggregator
// ==========================================
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn summarize(details: &[ProcessingDetail]) -> ResultSummary {
        let mut summary = ResultSummary {
            total: details.len(),
            ..ResultSummary::default()
        };
        for detail in details {
            match detail.status {
                DetailStatus::Success => summary.successful += 1,
                DetailStatus::Skipped => summary.skipped += 1,
                DetailStatus::Failed => {
                    summary.failed += 1;
                    let code = detail
                        .error_code
                        .map(|c| c.to_db_str())
                        .unwrap_or("UNKNOWN");
                    *summary.error_histogram.entry(code.to_string()).or_insert(0) += 1;
                }
            }
        }
        summary
    }

    pub fn partition(details: &[ProcessingDetail]) -> PartitionedResults<'_> {
        let mut parts = PartitionedResults::default();
        for detail in details {
            match detail.status {
                DetailStatus::Success => parts.successful.push(detail),
                DetailStatus::Failed => parts.failed.push(detail),
                DetailStatus::Skipped => parts.skipped.push(detail),
            }
        }
        parts
    }

    /// 渲染结果报表
    ///
    /// # 参数
    /// - operation: 所属操作
    /// - details: 全部明细（顺序不限）
    /// - format: csv / excel / json
    /// - failures_only: 仅输出失败记录
    pub fn render(
        operation: &BulkOperation,
        details: &[ProcessingDetail],
        format: InputFormat,
        failures_only: bool,
    ) -> ImportResult<RenderedReport> {
        let mut selected: Vec<&ProcessingDetail> = details
            .iter()
            .filter(|d| !failures_only || d.status == DetailStatus::Failed)
            .collect();
        selected.sort_by_key(|d| d.record_index);
        let rows: Vec<ReportRow> = selected.into_iter().map(ReportRow::from_detail).collect();

        let suffix = if failures_only { "failures" } else { "results" };
        let stem = format!("bulk-{}-{}", operation.id, suffix);

        match format {
            InputFormat::Csv => Ok(RenderedReport {
                file_name: format!("{}.csv", stem),
                content_type: "text/csv".to_string(),
                bytes: Self::render_csv(&rows)?,
            }),
            InputFormat::Excel => Ok(RenderedReport {
                file_name: format!("{}.xlsx", stem),
                content_type:
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                        .to_string(),
                bytes: Self::render_xlsx(&rows)?,
            }),
            InputFormat::Json => {
                let summary = Self::summarize(details);
                let report = JsonReport {
                    operation_id: &operation.id,
                    status: operation.status.to_string(),
                    failures_only,
                    summary: &summary,
                    records: rows,
                };
                Ok(RenderedReport {
                    file_name: format!("{}.json", stem),
                    content_type: "application/json".to_string(),
                    bytes: serde_json::to_vec_pretty(&report)?,
                })
            }
        }
    }

    fn render_csv(rows: &[ReportRow]) -> ImportResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(REPORT_COLUMNS)?;
        for row in rows {
            writer.write_record(row.cells())?;
        }
        writer
            .into_inner()
            .map_err(|e| ImportError::ReportRenderError(e.to_string()))
    }

    fn render_xlsx(rows: &[ReportRow]) -> ImportResult<Vec<u8>> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("results")?;

        for (col, name) in REPORT_COLUMNS.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *name, &header_format)?;
        }

        for (i, row) in rows.iter().enumerate() {
            let r = (i + 1) as u32;
            for (col, cell) in row.cells().into_iter().enumerate() {
                match col {
                    // record_index / retry_count 写数值
                    0 => worksheet.write_number(r, 0, row.record_index as f64)?,
                    7 => worksheet.write_number(r, 7, row.retry_count as f64)?,
                    _ => worksheet.write_string(r, col as u16, cell)?,
                };
            }
        }

        Ok(workbook.save_to_buffer()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::ProcessingOptions;
    use crate::domain::types::{ErrorCode, OperationStatus, ProcessingMode, RecordAction};
    use chrono::Utc;

    fn operation() -> BulkOperation {
        BulkOperation {
            id: "op-1".to_string(),
            org_id: "org-1".to_string(),
            parent_operation_id: None,
            status: OperationStatus::Completed,
            input_format: InputFormat::Csv,
            processing_mode: ProcessingMode::Async,
            options: ProcessingOptions::default(),
            total_records: 4,
            processed_records: 4,
            successful_records: 1,
            failed_records: 2,
            skipped_records: 1,
            progress_percentage: 100.0,
            current_batch: 1,
            total_batches: 1,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            error_summary: None,
            result_file_url: None,
            can_retry: true,
            cancellation_requested: false,
        }
    }

    fn details() -> Vec<ProcessingDetail> {
        vec![
            ProcessingDetail::failed(3, None, ErrorCode::Validation, "phone_number is required", 0),
            ProcessingDetail::success(0, Some("E0".into()), "f-0".into(), RecordAction::Created, 0),
            ProcessingDetail::failed(1, Some("E1".into()), ErrorCode::Duplicate, "dup", 0),
            ProcessingDetail::skipped(2, Some("E2".into()), Some("f-2".into()), "exists", 0),
        ]
    }

    #[test]
    fn test_summary_and_error_summary() {
        let summary = ResultAggregator::summarize(&details());
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            summary.error_summary().as_deref(),
            Some("2 record(s) failed: DUPLICATE=1, VALIDATION=1")
        );

        let all = details();
        let parts = ResultAggregator::partition(&all);
        assert_eq!(parts.failed.len(), 2);
    }

    #[test]
    fn test_no_failures_no_error_summary() {
        let only_ok = vec![ProcessingDetail::success(
            0,
            None,
            "f".into(),
            RecordAction::Created,
            0,
        )];
        assert_eq!(ResultAggregator::summarize(&only_ok).error_summary(), None);
    }

    #[test]
    fn test_render_csv_ordered_and_failures_only() {
        let op = operation();
        let report =
            ResultAggregator::render(&op, &details(), InputFormat::Csv, false).unwrap();
        assert_eq!(report.file_name, "bulk-op-1-results.csv");
        let text = String::from_utf8(report.bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("record_index,external_id,status"));
        assert!(lines[1].starts_with("0,E0,SUCCESS,CREATED,f-0"));
        assert!(lines[4].starts_with("3,,FAILED"));

        let failures =
            ResultAggregator::render(&op, &details(), InputFormat::Csv, true).unwrap();
        let text = String::from_utf8(failures.bytes).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_render_json_embeds_summary() {
        let report =
            ResultAggregator::render(&operation(), &details(), InputFormat::Json, false).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&report.bytes).unwrap();
        assert_eq!(value["summary"]["failed"], 2);
        assert_eq!(value["summary"]["error_histogram"]["DUPLICATE"], 1);
        assert_eq!(value["records"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_render_xlsx_produces_zip() {
        let report =
            ResultAggregator::render(&operation(), &details(), InputFormat::Excel, true).unwrap();
        assert!(report.file_name.ends_with(".xlsx"));
        assert_eq!(&report.bytes[..2], b"PK");
    }
}
