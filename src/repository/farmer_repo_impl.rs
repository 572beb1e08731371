// ==========================================
// 农户批量入驻 - 农户 Repository 实现
// ==========================================
// 职责: 实现农户数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::farmer::{Farmer, FarmerAddress, FarmerProfile, NewFarmer};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::farmer_repo::FarmerRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const FARMER_COLUMNS: &str = "farmer_id, org_id, user_id, external_id, first_name, last_name, \
     phone_number, email, date_of_birth, gender, address_json, custom_fields_json, \
     created_at, updated_at";

// ==========================================
// FarmerRepositoryImpl
// ==========================================
pub struct FarmerRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl FarmerRepositoryImpl {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 行 → Farmer（JSON 列在外层解析）
    fn map_row(row: &Row<'_>) -> rusqlite::Result<(Farmer, String, String)> {
        let address_json: String = row.get(10)?;
        let custom_fields_json: String = row.get(11)?;
        let farmer = Farmer {
            farmer_id: row.get(0)?,
            org_id: row.get(1)?,
            user_id: row.get(2)?,
            profile: FarmerProfile {
                external_id: row.get(3)?,
                first_name: row.get(4)?,
                last_name: row.get(5)?,
                phone_number: row.get(6)?,
                email: row.get(7)?,
                date_of_birth: row.get(8)?,
                gender: row.get(9)?,
                address: FarmerAddress::default(),
                custom_fields: BTreeMap::new(),
            },
            created_at: row.get::<_, DateTime<Utc>>(12)?,
            updated_at: row.get::<_, DateTime<Utc>>(13)?,
        };
        Ok((farmer, address_json, custom_fields_json))
    }

    fn hydrate(raw: (Farmer, String, String)) -> RepositoryResult<Farmer> {
        let (mut farmer, address_json, custom_fields_json) = raw;
        farmer.profile.address = serde_json::from_str(&address_json)?;
        farmer.profile.custom_fields = serde_json::from_str(&custom_fields_json)?;
        Ok(farmer)
    }

    fn query_one(
        conn: &Connection,
        where_clause: &str,
        a: &str,
        b: &str,
    ) -> RepositoryResult<Option<Farmer>> {
        let sql = format!("SELECT {} FROM farmer WHERE {}", FARMER_COLUMNS, where_clause);
        let raw = conn
            .query_row(&sql, params![a, b], Self::map_row)
            .optional()?;
        raw.map(Self::hydrate).transpose()
    }

    /// 分配 Kisan Sathi（重复分配幂等）
    pub fn assign_kisan_sathi(
        &self,
        farmer_id: &str,
        kisan_sathi_id: &str,
        org_id: &str,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO farmer_kisan_sathi (farmer_id, kisan_sathi_id, org_id, assigned_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![farmer_id, kisan_sathi_id, org_id, Utc::now()],
        )?;
        Ok(())
    }

    /// 查询农户已分配的 Kisan Sathi
    pub fn list_kisan_sathi(&self, farmer_id: &str) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT kisan_sathi_id FROM farmer_kisan_sathi WHERE farmer_id = ?1 ORDER BY assigned_at",
        )?;
        let ids = stmt
            .query_map(params![farmer_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[async_trait]
impl FarmerRepository for FarmerRepositoryImpl {
    async fn get_by_external_id(
        &self,
        org_id: &str,
        external_id: &str,
    ) -> RepositoryResult<Option<Farmer>> {
        let conn = self.get_conn()?;
        Self::query_one(&conn, "org_id = ?1 AND external_id = ?2", org_id, external_id)
    }

    async fn get_by_phone(
        &self,
        org_id: &str,
        phone_number: &str,
    ) -> RepositoryResult<Option<Farmer>> {
        let conn = self.get_conn()?;
        Self::query_one(&conn, "org_id = ?1 AND phone_number = ?2", org_id, phone_number)
    }

    async fn find_existing(
        &self,
        org_id: &str,
        external_ids: &[String],
        phone_numbers: &[String],
    ) -> RepositoryResult<Vec<Farmer>> {
        if external_ids.is_empty() && phone_numbers.is_empty() {
            return Ok(Vec::new());
        }

        // ?1 = org_id，其后依次为 external_id 与手机号
        let placeholders = |start: usize, n: usize| -> String {
            (start..start + n)
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let ext_in = placeholders(2, external_ids.len());
        let phone_in = placeholders(2 + external_ids.len(), phone_numbers.len());

        let mut conditions = Vec::new();
        if !external_ids.is_empty() {
            conditions.push(format!("external_id IN ({})", ext_in));
        }
        if !phone_numbers.is_empty() {
            conditions.push(format!("phone_number IN ({})", phone_in));
        }

        let sql = format!(
            "SELECT {} FROM farmer WHERE org_id = ?1 AND ({})",
            FARMER_COLUMNS,
            conditions.join(" OR ")
        );

        let values: Vec<&str> = std::iter::once(org_id)
            .chain(external_ids.iter().map(String::as_str))
            .chain(phone_numbers.iter().map(String::as_str))
            .collect();

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params_from_iter(values.iter()), Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter().map(Self::hydrate).collect()
    }

    async fn create(&self, farmer: NewFarmer) -> RepositoryResult<Farmer> {
        let now = Utc::now();
        let created = Farmer {
            farmer_id: Uuid::new_v4().to_string(),
            org_id: farmer.org_id,
            user_id: Some(farmer.user_id),
            profile: farmer.profile,
            created_at: now,
            updated_at: now,
        };

        let address_json = serde_json::to_string(&created.profile.address)?;
        let custom_fields_json = serde_json::to_string(&created.profile.custom_fields)?;

        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO farmer ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                FARMER_COLUMNS
            ),
            params![
                created.farmer_id,
                created.org_id,
                created.user_id,
                created.profile.external_id,
                created.profile.first_name,
                created.profile.last_name,
                created.profile.phone_number,
                created.profile.email,
                created.profile.date_of_birth,
                created.profile.gender,
                address_json,
                custom_fields_json,
                created.created_at,
                created.updated_at,
            ],
        )?;

        Ok(created)
    }

    async fn update(&self, farmer_id: &str, profile: FarmerProfile) -> RepositoryResult<Farmer> {
        let address_json = serde_json::to_string(&profile.address)?;
        let custom_fields_json = serde_json::to_string(&profile.custom_fields)?;

        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE farmer SET
                external_id = ?2, first_name = ?3, last_name = ?4, phone_number = ?5,
                email = ?6, date_of_birth = ?7, gender = ?8, address_json = ?9,
                custom_fields_json = ?10, updated_at = ?11
            WHERE farmer_id = ?1
            "#,
            params![
                farmer_id,
                profile.external_id,
                profile.first_name,
                profile.last_name,
                profile.phone_number,
                profile.email,
                profile.date_of_birth,
                profile.gender,
                address_json,
                custom_fields_json,
                Utc::now(),
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Farmer".to_string(),
                id: farmer_id.to_string(),
            });
        }

        let sql = format!("SELECT {} FROM farmer WHERE farmer_id = ?1", FARMER_COLUMNS);
        let raw = conn.query_row(&sql, params![farmer_id], Self::map_row)?;
        Self::hydrate(raw)
    }

    async fn count_by_org(&self, org_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM farmer WHERE org_id = ?1",
            params![org_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
