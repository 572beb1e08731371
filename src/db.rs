// ==========================================
// 农户批量入驻 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表（本地运行 / 测试库）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// foreign_keys 与 busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 幂等建表
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT,
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS identity_user (
    user_id       TEXT PRIMARY KEY,
    org_id        TEXT NOT NULL,
    phone_number  TEXT NOT NULL,
    email         TEXT,
    display_name  TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    UNIQUE (org_id, phone_number)
);

CREATE TABLE IF NOT EXISTS farmer (
    farmer_id           TEXT PRIMARY KEY,
    org_id              TEXT NOT NULL,
    user_id             TEXT,
    external_id         TEXT NOT NULL,
    first_name          TEXT NOT NULL,
    last_name           TEXT NOT NULL,
    phone_number        TEXT NOT NULL,
    email               TEXT,
    date_of_birth       TEXT,
    gender              TEXT,
    address_json        TEXT NOT NULL,
    custom_fields_json  TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    UNIQUE (org_id, external_id),
    UNIQUE (org_id, phone_number)
);

CREATE TABLE IF NOT EXISTS farmer_kisan_sathi (
    farmer_id       TEXT NOT NULL REFERENCES farmer(farmer_id) ON DELETE CASCADE,
    kisan_sathi_id  TEXT NOT NULL,
    org_id          TEXT NOT NULL,
    assigned_at     TEXT NOT NULL,
    PRIMARY KEY (farmer_id, kisan_sathi_id)
);

CREATE TABLE IF NOT EXISTS bulk_operation (
    operation_id         TEXT PRIMARY KEY,
    org_id               TEXT NOT NULL,
    parent_operation_id  TEXT,
    status               TEXT NOT NULL,
    input_format         TEXT NOT NULL,
    processing_mode      TEXT NOT NULL,
    options_json         TEXT NOT NULL,
    total_records        INTEGER NOT NULL,
    processed_records    INTEGER NOT NULL,
    successful_records   INTEGER NOT NULL,
    failed_records       INTEGER NOT NULL,
    skipped_records      INTEGER NOT NULL,
    current_batch        INTEGER NOT NULL,
    total_batches        INTEGER NOT NULL,
    created_at           TEXT NOT NULL,
    start_time           TEXT,
    end_time             TEXT,
    error_summary        TEXT,
    result_file_url      TEXT,
    can_retry            INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_bulk_operation_org ON bulk_operation(org_id, created_at);

CREATE TABLE IF NOT EXISTS bulk_processing_detail (
    operation_id     TEXT NOT NULL REFERENCES bulk_operation(operation_id) ON DELETE CASCADE,
    record_index     INTEGER NOT NULL,
    external_id      TEXT,
    status           TEXT NOT NULL,
    action           TEXT,
    farmer_id        TEXT,
    error            TEXT,
    error_code       TEXT,
    processed_at     TEXT NOT NULL,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    kisan_sathi_json TEXT NOT NULL,
    credentials_json TEXT NOT NULL,
    PRIMARY KEY (operation_id, record_index)
);
"#;
