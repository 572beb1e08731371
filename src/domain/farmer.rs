// ==========================================
// 农户批量入驻 - 农户领域模型
// ==========================================
// 职责: 导入中间结构体（NormalizedFarmerRecord）与农户实体（Farmer）
// 红线: NormalizedFarmerRecord 由解析器产出后不可修改，默认值补全生成新副本
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// FarmerAddress - 农户地址
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerAddress {
    pub street_address: Option<String>,
    pub village: Option<String>,
    pub block: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub country: Option<String>,
}

// ==========================================
// NormalizedFarmerRecord - 导入中间结构体
// ==========================================
// 用途: 文件解析 → 字段映射 → 此结构
// 生命周期: 随批量操作保存，供按下标重试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFarmerRecord {
    // 元信息
    pub record_index: usize, // 非空数据行的 0 基下标（文件顺序）

    // 身份字段
    pub external_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String, // 规范化后的号码（合法时为 10 位）
    pub email: Option<String>,

    // 基础信息
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: FarmerAddress,

    // 未识别列原样保留
    pub custom_fields: BTreeMap<String, String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl NormalizedFarmerRecord {
    /// 全名（用于身份服务展示名）
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

// ==========================================
// FarmerProfile - 农户可写字段
// ==========================================
// 用途: 创建与更新共用的写入载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerProfile {
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: FarmerAddress,
    pub custom_fields: BTreeMap<String, String>,
}

impl FarmerProfile {
    /// 从（已补全默认值的）导入记录构造
    pub fn from_record(record: &NormalizedFarmerRecord) -> Self {
        Self {
            external_id: record.external_id.clone().unwrap_or_default(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            phone_number: record.phone_number.clone(),
            email: record.email.clone(),
            date_of_birth: record.date_of_birth.clone(),
            gender: record.gender.clone(),
            address: record.address.clone(),
            custom_fields: record.custom_fields.clone(),
        }
    }
}

// ==========================================
// NewFarmer - 创建农户请求
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFarmer {
    pub org_id: String,
    pub user_id: String, // 身份服务中的用户 ID
    pub profile: FarmerProfile,
}

// ==========================================
// Farmer - 农户实体
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farmer {
    pub farmer_id: String,
    pub org_id: String,
    pub user_id: Option<String>,
    pub profile: FarmerProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
