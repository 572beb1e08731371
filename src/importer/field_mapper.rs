// ==========================================
// 农户批量入驻 - 字段映射器实现
// ==========================================
// 职责: 表头规范化（lower_snake_case + 别名） + 行 → NormalizedFarmerRecord
// 说明: 未识别列原样保留为 custom_fields
// ==========================================

use crate::domain::farmer::{FarmerAddress, NormalizedFarmerRecord};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::importer_trait::{DataCleaner as _, FieldMapper as FieldMapperTrait};
use std::collections::{BTreeMap, HashMap};

/// 必填列（规范化后）
pub const REQUIRED_HEADERS: [&str; 3] = ["first_name", "last_name", "phone_number"];

/// 已识别的标准列（规范化后）
pub const KNOWN_FIELDS: [&str; 15] = [
    "external_id",
    "first_name",
    "last_name",
    "phone_number",
    "email",
    "date_of_birth",
    "gender",
    "street_address",
    "village",
    "block",
    "district",
    "state",
    "pincode",
    "country",
    "password",
];

pub struct FieldMapper {
    cleaner: DataCleaner,
}

impl FieldMapper {
    pub fn new() -> Self {
        Self {
            cleaner: DataCleaner,
        }
    }

    /// 是否为已识别的标准列
    pub fn is_known_field(name: &str) -> bool {
        KNOWN_FIELDS.contains(&name)
    }

    /// 别名 → 标准列名
    fn resolve_alias(name: &str) -> &str {
        match name {
            "fname" | "firstname" | "given_name" => "first_name",
            "lname" | "lastname" | "surname" | "family_name" => "last_name",
            "phone" | "mobile" | "mobile_number" | "mobile_no" | "phone_no" | "contact_number"
            | "phonenumber" => "phone_number",
            "email_address" | "e_mail" | "mail" => "email",
            "dob" | "birth_date" | "birthdate" | "dateofbirth" => "date_of_birth",
            "sex" => "gender",
            "address" | "address_line" | "street" | "address_line_1" => "street_address",
            "pin" | "pin_code" | "postal_code" | "zip" | "zip_code" => "pincode",
            "tehsil" | "taluka" | "mandal" => "block",
            "farmer_id" | "externalid" | "ext_id" => "external_id",
            other => other,
        }
    }

    /// 取规范化后的可选值
    fn get(&self, row: &HashMap<String, String>, key: &str) -> Option<String> {
        self.cleaner.normalize_null(row.get(key).cloned())
    }
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMapperTrait for FieldMapper {
    fn normalize_header(&self, header: &str) -> String {
        let trimmed = header.trim().trim_start_matches('\u{feff}');

        // camelCase / 空格 / 标点 → lower_snake_case
        let mut snake = String::with_capacity(trimmed.len() + 4);
        let mut prev_lower_or_digit = false;
        for ch in trimmed.chars() {
            if ch.is_alphanumeric() {
                if ch.is_uppercase() && prev_lower_or_digit {
                    snake.push('_');
                }
                snake.extend(ch.to_lowercase());
                prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
            } else {
                if !snake.ends_with('_') {
                    snake.push('_');
                }
                prev_lower_or_digit = false;
            }
        }
        let snake = snake.trim_matches('_').to_string();

        Self::resolve_alias(&snake).to_string()
    }

    fn map_to_record(
        &self,
        row: &HashMap<String, String>,
        record_index: usize,
    ) -> NormalizedFarmerRecord {
        let phone_number = self
            .get(row, "phone_number")
            .map(|p| self.cleaner.normalize_phone(&p))
            .unwrap_or_default();

        let date_of_birth = self
            .get(row, "date_of_birth")
            .map(|d| self.cleaner.normalize_date(&d));

        let custom_fields: BTreeMap<String, String> = row
            .iter()
            .filter(|(k, v)| !Self::is_known_field(k) && !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect();

        NormalizedFarmerRecord {
            record_index,
            external_id: self.get(row, "external_id"),
            first_name: self.get(row, "first_name").unwrap_or_default(),
            last_name: self.get(row, "last_name").unwrap_or_default(),
            phone_number,
            email: self.cleaner.clean_email(row.get("email")),
            date_of_birth,
            gender: self.cleaner.clean_gender(row.get("gender")),
            address: FarmerAddress {
                street_address: self.get(row, "street_address"),
                village: self.get(row, "village"),
                block: self.get(row, "block"),
                district: self.get(row, "district"),
                state: self.get(row, "state"),
                pincode: self.get(row, "pincode"),
                country: self.get(row, "country"),
            },
            custom_fields,
            password: self.get(row, "password"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_normalize_header_snake_case() {
        let mapper = FieldMapper::new();
        assert_eq!(mapper.normalize_header("First Name"), "first_name");
        assert_eq!(mapper.normalize_header("  LAST-NAME "), "last_name");
        assert_eq!(mapper.normalize_header("firstName"), "first_name");
        assert_eq!(mapper.normalize_header("\u{feff}Phone Number"), "phone_number");
        assert_eq!(mapper.normalize_header("Land Holding (Acres)"), "land_holding_acres");
    }

    #[test]
    fn test_normalize_header_aliases() {
        let mapper = FieldMapper::new();
        assert_eq!(mapper.normalize_header("Mobile"), "phone_number");
        assert_eq!(mapper.normalize_header("DOB"), "date_of_birth");
        assert_eq!(mapper.normalize_header("Pin Code"), "pincode");
        assert_eq!(mapper.normalize_header("Farmer ID"), "external_id");
    }

    #[test]
    fn test_map_to_record_normalizes_values() {
        let mapper = FieldMapper::new();
        let record = mapper.map_to_record(
            &row(&[
                ("first_name", " Suresh "),
                ("last_name", "Patel"),
                ("phone_number", "+91-98765-43220"),
                ("date_of_birth", "19800101"),
                ("email", " Suresh@Example.COM "),
                ("gender", "M"),
                ("village", "Anand"),
                ("crop", "Cotton"),
                ("land_holding_acres", ""),
            ]),
            3,
        );

        assert_eq!(record.record_index, 3);
        assert_eq!(record.first_name, "Suresh");
        assert_eq!(record.phone_number, "9876543220");
        assert_eq!(record.date_of_birth.as_deref(), Some("1980-01-01"));
        assert_eq!(record.email.as_deref(), Some("suresh@example.com"));
        assert_eq!(record.gender.as_deref(), Some("m"));
        assert_eq!(record.address.village.as_deref(), Some("Anand"));
        assert_eq!(record.custom_fields.get("crop").map(String::as_str), Some("Cotton"));
        // 空的未识别列不进入 custom_fields
        assert!(!record.custom_fields.contains_key("land_holding_acres"));
    }

    #[test]
    fn test_map_to_record_missing_phone_is_empty() {
        let mapper = FieldMapper::new();
        let record = mapper.map_to_record(
            &row(&[("first_name", "Asha"), ("last_name", "Rao"), ("phone_number", "")]),
            0,
        );
        assert_eq!(record.phone_number, "");
        assert!(record.external_id.is_none());
    }
}
