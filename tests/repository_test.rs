// ==========================================
// SQLite 仓储集成测试
// ==========================================
// 测试目标: 农户仓储 / 操作归档 / 配置读取
// ==========================================


use chrono::Utc;
use farmer_onboarding::config::{config_keys, BulkConfig, BulkConfigReader, ConfigManager};
use farmer_onboarding::domain::farmer::{FarmerAddress, FarmerProfile, NewFarmer};
use farmer_onboarding::domain::operation::{
    AncillaryOutcome, BulkOperation, ProcessingDetail, ProcessingOptions,
};
use farmer_onboarding::domain::types::{
    DeduplicationMode, DetailStatus, ErrorCode, InputFormat, OperationStatus, ProcessingMode,
    RecordAction,
};
use farmer_onboarding::repository::{
    BulkOperationRepository, FarmerRepository, FarmerRepositoryImpl, RepositoryError,
};
use std::collections::BTreeMap;

fn profile(external_id: &str, phone: &str) -> FarmerProfile {
    FarmerProfile {
        external_id: external_id.to_string(),
        first_name: "Suresh".to_string(),
        last_name: "Patel".to_string(),
        phone_number: phone.to_string(),
        email: None,
        date_of_birth: Some("1985-03-15".to_string()),
        gender: Some("male".to_string()),
        address: FarmerAddress {
            village: Some("Karamsad".to_string()),
            country: Some("India".to_string()),
            ..FarmerAddress::default()
        },
        custom_fields: BTreeMap::from([("crop".to_string(), "cotton".to_string())]),
    }
}

fn new_farmer(org: &str, external_id: &str, phone: &str) -> NewFarmer {
    NewFarmer {
        org_id: org.to_string(),
        user_id: format!("user-{}", phone),
        profile: profile(external_id, phone),
    }
}

#[tokio::test]
async fn test_farmer_create_and_lookup() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let repo = FarmerRepositoryImpl::new(&db_path).unwrap();

    let created = repo
        .create(new_farmer("org-1", "FRM-1", "9876543220"))
        .await
        .unwrap();

    let by_ext = repo.get_by_external_id("org-1", "FRM-1").await.unwrap().unwrap();
    assert_eq!(by_ext.farmer_id, created.farmer_id);
    assert_eq!(by_ext.profile.custom_fields.get("crop").map(String::as_str), Some("cotton"));
    assert_eq!(by_ext.profile.address.village.as_deref(), Some("Karamsad"));

    let by_phone = repo.get_by_phone("org-1", "9876543220").await.unwrap().unwrap();
    assert_eq!(by_phone.farmer_id, created.farmer_id);

    // 组织隔离
    assert!(repo.get_by_phone("org-2", "9876543220").await.unwrap().is_none());
    assert_eq!(repo.count_by_org("org-1").await.unwrap(), 1);
    assert_eq!(repo.count_by_org("org-2").await.unwrap(), 0);
}

#[tokio::test]
async fn test_farmer_unique_constraints() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let repo = FarmerRepositoryImpl::new(&db_path).unwrap();

    repo.create(new_farmer("org-1", "FRM-1", "9876543220")).await.unwrap();

    let err = repo
        .create(new_farmer("org-1", "FRM-2", "9876543220"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

    // 不同组织允许相同手机号
    repo.create(new_farmer("org-2", "FRM-1", "9876543220")).await.unwrap();
}

#[tokio::test]
async fn test_find_existing_matches_either_key() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let repo = FarmerRepositoryImpl::new(&db_path).unwrap();
    repo.create(new_farmer("org-1", "FRM-1", "9876543220")).await.unwrap();
    repo.create(new_farmer("org-1", "FRM-2", "9876543221")).await.unwrap();
    repo.create(new_farmer("org-1", "FRM-3", "9876543222")).await.unwrap();

    let found = repo
        .find_existing(
            "org-1",
            &["FRM-1".to_string(), "FRM-9".to_string()],
            &["9876543222".to_string()],
        )
        .await
        .unwrap();
    let mut ids: Vec<String> = found.into_iter().map(|f| f.profile.external_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["FRM-1", "FRM-3"]);

    assert!(repo.find_existing("org-1", &[], &[]).await.unwrap().is_empty());
    assert!(repo
        .find_existing("org-1", &[], &["9876543221".to_string()])
        .await
        .unwrap()
        .len()
        == 1);
}

#[tokio::test]
async fn test_farmer_update() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let repo = FarmerRepositoryImpl::new(&db_path).unwrap();
    let created = repo
        .create(new_farmer("org-1", "FRM-1", "9876543220"))
        .await
        .unwrap();

    let mut changed = profile("FRM-1", "9876543220");
    changed.email = Some("suresh@example.com".to_string());
    let updated = repo.update(&created.farmer_id, changed).await.unwrap();
    assert_eq!(updated.profile.email.as_deref(), Some("suresh@example.com"));
    assert_eq!(updated.created_at, created.created_at);

    let err = repo
        .update("missing", profile("FRM-X", "9000000000"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));
}

#[tokio::test]
async fn test_kisan_sathi_assignment_is_idempotent() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let repo = FarmerRepositoryImpl::new(&db_path).unwrap();
    let farmer = repo
        .create(new_farmer("org-1", "FRM-1", "9876543220"))
        .await
        .unwrap();

    repo.assign_kisan_sathi(&farmer.farmer_id, "ks-1", "org-1").unwrap();
    repo.assign_kisan_sathi(&farmer.farmer_id, "ks-1", "org-1").unwrap();
    repo.assign_kisan_sathi(&farmer.farmer_id, "ks-2", "org-1").unwrap();

    let assigned = repo.list_kisan_sathi(&farmer.farmer_id).unwrap();
    assert_eq!(assigned.len(), 2);
    assert!(assigned.contains(&"ks-1".to_string()));
}

fn operation(id: &str, org: &str) -> BulkOperation {
    BulkOperation {
        id: id.to_string(),
        org_id: org.to_string(),
        parent_operation_id: None,
        status: OperationStatus::Completed,
        input_format: InputFormat::Csv,
        processing_mode: ProcessingMode::Async,
        options: ProcessingOptions {
            deduplication_mode: DeduplicationMode::Update,
            ..ProcessingOptions::default()
        },
        total_records: 3,
        processed_records: 3,
        successful_records: 1,
        failed_records: 1,
        skipped_records: 1,
        progress_percentage: 100.0,
        current_batch: 1,
        total_batches: 1,
        created_at: Utc::now(),
        start_time: Some(Utc::now()),
        end_time: Some(Utc::now()),
        error_summary: Some("1 record(s) failed: IDENTITY_FAILED=1".to_string()),
        result_file_url: Some(format!("/api/v1/bulk/operations/{}/results", id)),
        can_retry: true,
        cancellation_requested: false,
    }
}

fn details() -> Vec<ProcessingDetail> {
    let mut success = ProcessingDetail::success(
        0,
        Some("FRM-1".to_string()),
        "farmer-1".to_string(),
        RecordAction::Created,
        0,
    );
    success.kisan_sathi = AncillaryOutcome::succeeded();
    success.credentials = AncillaryOutcome::failed("email: no email address on record");
    vec![
        success,
        ProcessingDetail::failed(
            1,
            Some("FRM-2".to_string()),
            ErrorCode::IdentityFailed,
            "identity failed: down",
            0,
        ),
        ProcessingDetail::skipped(2, None, Some("farmer-9".to_string()), "farmer already exists", 0),
    ]
}

#[test]
fn test_operation_archive_round_trip() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let repo = BulkOperationRepository::new(&db_path).unwrap();
    let op = operation("op-1", "org-1");

    assert_eq!(repo.save(&op, &details()).unwrap(), 3);

    let loaded = repo.find_by_id("op-1").unwrap().unwrap();
    assert_eq!(loaded.status, OperationStatus::Completed);
    assert_eq!(loaded.options.deduplication_mode, DeduplicationMode::Update);
    assert_eq!(loaded.error_summary, op.error_summary);
    assert!(loaded.can_retry);
    assert!(loaded.counters_consistent());
    assert_eq!(loaded.progress_percentage, 100.0);

    let loaded_details = repo.find_details("op-1").unwrap();
    assert_eq!(loaded_details.len(), 3);
    assert_eq!(loaded_details[0].action, Some(RecordAction::Created));
    assert!(loaded_details[0].kisan_sathi.succeeded);
    assert!(!loaded_details[0].credentials.succeeded);
    assert_eq!(loaded_details[1].error_code, Some(ErrorCode::IdentityFailed));
    assert_eq!(loaded_details[2].status, DetailStatus::Skipped);
    assert_eq!(loaded_details[2].farmer_id.as_deref(), Some("farmer-9"));

    // 重复归档覆盖，不产生重复明细
    assert_eq!(repo.save(&op, &details()[..1]).unwrap(), 1);
    assert_eq!(repo.find_details("op-1").unwrap().len(), 1);

    assert!(repo.find_by_id("missing").unwrap().is_none());
}

#[test]
fn test_operation_list_by_org() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let repo = BulkOperationRepository::new(&db_path).unwrap();

    let mut older = operation("op-old", "org-1");
    older.created_at = Utc::now() - chrono::Duration::minutes(5);
    repo.save(&older, &[]).unwrap();
    repo.save(&operation("op-new", "org-1"), &[]).unwrap();
    repo.save(&operation("op-other", "org-2"), &[]).unwrap();

    let listed: Vec<String> = repo
        .list_by_org("org-1")
        .unwrap()
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(listed, vec!["op-new", "op-old"]);
}

#[tokio::test]
async fn test_config_manager_overrides_and_fallbacks() {
    let (_tmp, db_path) = test_helpers::create_test_db().unwrap();
    let config = ConfigManager::new(&db_path).unwrap();

    let defaults = config.load_bulk_config().await.unwrap();
    assert_eq!(defaults, BulkConfig::default());

    config
        .set_global_config_value(config_keys::DEFAULT_CHUNK_SIZE, "25")
        .unwrap();
    config
        .set_global_config_value(config_keys::MAX_RECORDS, "not-a-number")
        .unwrap();
    config
        .set_global_config_value(config_keys::API_BASE_PATH, "/farmers/bulk/")
        .unwrap();

    let loaded = config.load_bulk_config().await.unwrap();
    assert_eq!(loaded.default_chunk_size, 25);
    assert_eq!(loaded.max_records, BulkConfig::default().max_records);
    assert_eq!(loaded.api_base_path, "/farmers/bulk");

    let snapshot = config.get_config_snapshot().unwrap();
    assert_eq!(
        snapshot.get(config_keys::DEFAULT_CHUNK_SIZE).map(String::as_str),
        Some("25")
    );
}
