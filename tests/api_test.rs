// ==========================================
// BulkApi 端到端测试
// ==========================================
// 测试目标: 提交预检、格式推断、结果下载、模板、归档回落、列表
// 装配: AppState（真实 SQLite + 本地协作方）
// ==========================================


use farmer_onboarding::api::{RetryRequest, SubmitOptions, SubmitRequest};
use farmer_onboarding::app::AppState;
use farmer_onboarding::config::config_keys;
use farmer_onboarding::domain::types::{InputFormat, OperationStatus, ProcessingMode};
use farmer_onboarding::logging;
use farmer_onboarding::engine::REPORT_COLUMNS;
use farmer_onboarding::repository::FarmerRepository;
use test_helpers::*;

fn upload(file_name: &str) -> SubmitRequest {
    SubmitRequest {
        org_id: "org-1".to_string(),
        input_format: None,
        file_name: Some(file_name.to_string()),
        processing_mode: ProcessingMode::Sync,
        options: SubmitOptions::default(),
    }
}

fn mixed_csv() -> Vec<u8> {
    csv_from_rows(&[
        "First Name,Last Name,Mobile,Email,Village",
        "Suresh,Patel,+91 98765 43220,suresh@example.com,Karamsad",
        "Ramesh,Shah,,ramesh@example.com,Anand",
        "Mahesh,Desai,9876543222,,Nadiad",
    ])
}

#[tokio::test]
async fn test_sync_submit_persists_farmers_and_archive() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).await.unwrap();

    let resp = state
        .bulk_api
        .submit(upload("farmers.csv"), &mixed_csv())
        .await
        .unwrap();
    assert_eq!(resp.status, OperationStatus::Completed);
    assert_eq!(resp.total_records, 3);
    assert_eq!(
        resp.status_url,
        format!("/api/v1/bulk/operations/{}", resp.operation_id)
    );
    assert_eq!(
        resp.result_url.as_deref(),
        Some(format!("/api/v1/bulk/operations/{}/results", resp.operation_id).as_str())
    );

    let status = state.bulk_api.get_status(&resp.operation_id).await.unwrap();
    assert_eq!(status.progress.successful, 2);
    assert_eq!(status.progress.failed, 1);
    assert_eq!(status.progress.percentage, 100.0);
    assert_eq!(
        status.error_summary.as_deref(),
        Some("1 record(s) failed: VALIDATION=1")
    );

    assert_eq!(state.farmer_repo.count_by_org("org-1").await.unwrap(), 2);
    let suresh = state
        .farmer_repo
        .get_by_phone("org-1", "9876543220")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(suresh.profile.address.country.as_deref(), Some("India"));
    assert!(suresh.profile.external_id.starts_with("FRM-9876543220-"));

    let archived = state
        .operation_repo
        .find_by_id(&resp.operation_id)
        .unwrap()
        .unwrap();
    assert_eq!(archived.status, OperationStatus::Completed);
    assert_eq!(state.operation_repo.find_details(&resp.operation_id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_download_results_in_each_format() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).await.unwrap();
    let resp = state
        .bulk_api
        .submit(upload("farmers.csv"), &mixed_csv())
        .await
        .unwrap();
    let id = &resp.operation_id;

    let csv_report = state
        .bulk_api
        .download_results(id, InputFormat::Csv, false)
        .await
        .unwrap();
    assert_eq!(csv_report.file_name, format!("bulk-{}-results.csv", id));
    assert_eq!(csv_report.content_type, "text/csv");
    let text = String::from_utf8(csv_report.bytes).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), REPORT_COLUMNS.join(","));
    assert_eq!(lines.count(), 3);

    let failures = state
        .bulk_api
        .download_results(id, InputFormat::Csv, true)
        .await
        .unwrap();
    assert_eq!(failures.file_name, format!("bulk-{}-failures.csv", id));
    let text = String::from_utf8(failures.bytes).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains("VALIDATION"));
    assert!(text.contains("phone_number is required"));

    let json = state
        .bulk_api
        .download_results(id, InputFormat::Json, false)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json.bytes).unwrap();
    assert_eq!(value["summary"]["successful"], 2);
    assert_eq!(value["records"].as_array().unwrap().len(), 3);

    let xlsx = state
        .bulk_api
        .download_results(id, InputFormat::Excel, false)
        .await
        .unwrap();
    assert!(xlsx.file_name.ends_with(".xlsx"));
    assert_eq!(&xlsx.bytes[..2], b"PK");

    let missing = state
        .bulk_api
        .download_results("missing", InputFormat::Csv, false)
        .await
        .unwrap_err();
    assert_eq!(missing.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_json_upload_with_nested_address() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).await.unwrap();

    let body = br#"{"farmers": [
        {"first_name": "Suresh", "last_name": "Patel", "phone_number": "9876543220",
         "address": {"village": "Karamsad", "district": "Anand"}, "crop": "cotton"}
    ]}"#;
    let resp = state
        .bulk_api
        .submit(upload("farmers.json"), body)
        .await
        .unwrap();
    assert_eq!(resp.status, OperationStatus::Completed);

    let farmer = state
        .farmer_repo
        .get_by_phone("org-1", "9876543220")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(farmer.profile.address.district.as_deref(), Some("Anand"));
    assert_eq!(
        farmer.profile.custom_fields.get("crop").map(String::as_str),
        Some("cotton")
    );
}

fn farmers_xlsx() -> Vec<u8> {
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("dd/mm/yyyy");
    let sheet = workbook.add_worksheet();
    for (col, name) in ["First Name", "Last Name", "Mobile", "Date of Birth", "Crop"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, col as u16, *name).unwrap();
    }
    for (row, (first, mobile)) in [("Suresh", 9876543220.0), ("Mahesh", 9876543222.0)]
        .iter()
        .enumerate()
    {
        let r = row as u32 + 1;
        sheet.write_string(r, 0, *first).unwrap();
        sheet.write_string(r, 1, "Patel").unwrap();
        sheet.write_number(r, 2, *mobile).unwrap();
        sheet.write_string(r, 4, "cotton").unwrap();
    }
    let dob = ExcelDateTime::from_ymd(1985, 3, 15).unwrap();
    sheet.write_datetime_with_format(1, 3, &dob, &date_format).unwrap();
    // 校验失败行
    sheet.write_string(3, 0, "Ramesh").unwrap();
    sheet.write_string(3, 1, "Shah").unwrap();
    sheet.write_number(3, 2, 12345.0).unwrap();
    workbook.save_to_buffer().unwrap()
}

#[tokio::test]
async fn test_excel_upload_end_to_end() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).await.unwrap();

    let resp = state
        .bulk_api
        .submit(upload("farmers.xlsx"), &farmers_xlsx())
        .await
        .unwrap();
    assert_eq!(resp.status, OperationStatus::Completed);
    assert_eq!(resp.total_records, 3);

    let status = state.bulk_api.get_status(&resp.operation_id).await.unwrap();
    assert_eq!(status.progress.successful, 2);
    assert_eq!(status.progress.failed, 1);

    let suresh = state
        .farmer_repo
        .get_by_phone("org-1", "9876543220")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(suresh.profile.date_of_birth.as_deref(), Some("1985-03-15"));
    assert_eq!(
        suresh.profile.custom_fields.get("crop").map(String::as_str),
        Some("cotton")
    );
    assert!(state
        .farmer_repo
        .get_by_phone("org-1", "9876543222")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_preflight_errors_are_synchronous() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path.clone()).await.unwrap();
    let api = &state.bulk_api;

    let err = api
        .submit(upload("farmers.csv"), b"first_name,last_name\nSuresh,Patel\n")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MISSING_HEADERS");

    let err = api.submit(upload("farmers.csv"), b"   ").await.unwrap_err();
    assert_eq!(err.code(), "EMPTY_FILE");

    let err = api
        .submit(upload("farmers.csv"), b"first_name,last_name,phone_number\n")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_RECORDS");

    let err = api.submit(upload("farmers.pdf"), b"%PDF").await.unwrap_err();
    assert_eq!(err.code(), "UNSUPPORTED_FORMAT");

    let mut no_org = upload("farmers.csv");
    no_org.org_id = "  ".to_string();
    let err = api.submit(no_org, &farmers_csv(1)).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    // 配置在每次提交时读取，收紧上限立即生效
    state
        .config_manager
        .set_global_config_value(config_keys::MAX_RECORDS, "5")
        .unwrap();
    state
        .config_manager
        .set_global_config_value(config_keys::MAX_UPLOAD_BYTES, "2048")
        .unwrap();

    let err = api.submit(upload("farmers.csv"), &farmers_csv(6)).await.unwrap_err();
    assert_eq!(err.code(), "TOO_MANY_RECORDS");

    let err = api
        .submit(upload("farmers.csv"), &farmers_csv(200))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FILE_TOO_LARGE");

    assert!(api.list_operations("org-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_archived_operations_survive_restart() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let operation_id = {
        let state = AppState::new(db_path.clone()).await.unwrap();
        let resp = state
            .bulk_api
            .submit(upload("farmers.csv"), &mixed_csv())
            .await
            .unwrap();
        resp.operation_id
    };

    // 新实例: 内存追踪器为空，状态 / 结果 / 列表回落到归档
    let state = AppState::new(db_path).await.unwrap();
    assert!(!state.tracker.contains(&operation_id));

    let status = state.bulk_api.get_status(&operation_id).await.unwrap();
    assert_eq!(status.status, OperationStatus::Completed);
    assert_eq!(status.progress.failed, 1);
    assert!(status.can_retry);

    let report = state
        .bulk_api
        .download_results(&operation_id, InputFormat::Csv, true)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(report.bytes).unwrap().lines().count(), 2);

    // 取消终态操作不报错
    let cancelled = state.bulk_api.cancel(&operation_id).await.unwrap();
    assert_eq!(cancelled.status, OperationStatus::Completed);

    // 记录集不在内存中，无法重试
    let err = state
        .bulk_api
        .retry(RetryRequest {
            operation_id: operation_id.clone(),
            ..RetryRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    // 新提交 + 归档合并列表，按创建时间倒序
    let resp = state
        .bulk_api
        .submit(upload("farmers.csv"), &farmers_csv(2))
        .await
        .unwrap();
    let listed = state.bulk_api.list_operations("org-1").await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|s| s.operation_id.as_str()).collect();
    assert_eq!(ids, vec![resp.operation_id.as_str(), operation_id.as_str()]);
    assert!(state.bulk_api.list_operations("org-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_async_submit_reports_progress_until_done() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).await.unwrap();

    let mut req = upload("farmers.csv");
    req.processing_mode = ProcessingMode::Batch;
    let resp = state.bulk_api.submit(req, &farmers_csv(30)).await.unwrap();
    assert_eq!(resp.status, OperationStatus::Processing);
    assert!(resp.estimated_completion.is_some());

    let op = wait_for_terminal(&state.tracker, &resp.operation_id).await;
    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.successful_records, 30);

    let status = state.bulk_api.get_status(&resp.operation_id).await.unwrap();
    assert_eq!(status.result_url, op.result_file_url);
}

#[tokio::test]
async fn test_template_outputs() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).await.unwrap();

    let fields = state.bulk_api.template();
    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(required, vec!["first_name", "last_name", "phone_number"]);

    let csv = String::from_utf8(state.bulk_api.template_csv().unwrap()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("external_id,first_name,last_name,phone_number"));
    assert!(lines[1].contains("9876543220"));

    // 模板本身可直接导入
    let resp = state
        .bulk_api
        .submit(upload("template.csv"), csv.as_bytes())
        .await
        .unwrap();
    assert_eq!(resp.status, OperationStatus::Completed);
    let status = state.bulk_api.get_status(&resp.operation_id).await.unwrap();
    assert_eq!(status.progress.successful, 1);
}

#[tokio::test]
async fn test_evicted_operations_are_served_from_archive() {
    let (_tmp, db_path) = create_test_db().unwrap();
    {
        let state = AppState::new(db_path.clone()).await.unwrap();
        state
            .config_manager
            .set_global_config_value(config_keys::RETAINED_OPERATIONS, "1")
            .unwrap();
    }

    let state = AppState::new(db_path).await.unwrap();
    let first = state
        .bulk_api
        .submit(upload("farmers.csv"), &mixed_csv())
        .await
        .unwrap();
    assert!(state.tracker.contains(&first.operation_id));

    let second = state
        .bulk_api
        .submit(upload("farmers.csv"), &farmers_csv(2))
        .await
        .unwrap();
    assert!(!state.tracker.contains(&first.operation_id));
    assert!(state.tracker.contains(&second.operation_id));

    // 移出内存后状态 / 结果由归档提供
    let status = state.bulk_api.get_status(&first.operation_id).await.unwrap();
    assert_eq!(status.status, OperationStatus::Completed);
    assert_eq!(status.progress.failed, 1);
    let report = state
        .bulk_api
        .download_results(&first.operation_id, InputFormat::Csv, true)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(report.bytes).unwrap().lines().count(), 2);

    let err = state
        .bulk_api
        .retry(RetryRequest {
            operation_id: first.operation_id.clone(),
            ..RetryRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    assert_eq!(state.bulk_api.list_operations("org-1").await.unwrap().len(), 2);
}
