// ==========================================
// 农户批量入驻 - 记录校验器实现
// ==========================================
// 职责: 必填 / 手机号 / 邮箱 / 性别校验 + 默认值补全
// 红线: 校验失败只记录到明细，从不中止整个操作
// ==========================================

use crate::domain::farmer::NormalizedFarmerRecord;
use crate::domain::operation::ValidationOutcome;
use crate::importer::importer_trait::RecordValidator;

/// 缺省国家
pub const DEFAULT_COUNTRY: &str = "India";

/// 允许的性别取值（不区分大小写）
const ALLOWED_GENDERS: [&str; 5] = ["male", "female", "other", "m", "f"];

pub struct ValidatorImpl;

impl ValidatorImpl {
    pub fn new() -> Self {
        Self
    }

    /// 10 位手机号，首位 6-9
    pub fn is_valid_mobile(phone: &str) -> bool {
        phone.len() == 10
            && phone.chars().all(|c| c.is_ascii_digit())
            && matches!(phone.as_bytes()[0], b'6'..=b'9')
    }

    /// 宽松邮箱校验: 包含 "@" 和 "."
    pub fn is_valid_email(email: &str) -> bool {
        email.contains('@') && email.contains('.')
    }

    /// YYYY-MM-DD 形态检查（只看格式）
    fn is_iso_date_shape(value: &str) -> bool {
        let bytes = value.as_bytes();
        bytes.len() == 10
            && bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
    }

    /// 派生 external_id: FRM-<手机号>-<名长+姓长>
    ///
    /// 同一文件重复提交得到相同 ID，保证重试幂等
    pub fn derive_external_id(record: &NormalizedFarmerRecord) -> String {
        let name_len = record.first_name.chars().count() + record.last_name.chars().count();
        format!("FRM-{}-{}", record.phone_number, name_len)
    }
}

impl Default for ValidatorImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordValidator for ValidatorImpl {
    fn validate(&self, record: &NormalizedFarmerRecord) -> ValidationOutcome {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if record.first_name.trim().is_empty() {
            errors.push("first_name is required".to_string());
        }
        if record.last_name.trim().is_empty() {
            errors.push("last_name is required".to_string());
        }

        if record.phone_number.is_empty() {
            errors.push("phone_number is required".to_string());
        } else if !Self::is_valid_mobile(&record.phone_number) {
            errors.push(
                "phone_number must be a 10-digit mobile number starting with 6-9".to_string(),
            );
        }

        if let Some(email) = record.email.as_deref() {
            if !Self::is_valid_email(email) {
                errors.push("email is invalid".to_string());
            }
        }

        if let Some(gender) = record.gender.as_deref() {
            if !ALLOWED_GENDERS.contains(&gender.to_lowercase().as_str()) {
                errors.push("gender must be one of male, female, other, m, f".to_string());
            }
        }

        // 以下只告警
        if let Some(dob) = record.date_of_birth.as_deref() {
            if !Self::is_iso_date_shape(dob) {
                warnings.push(format!("date_of_birth '{}' is not in YYYY-MM-DD form", dob));
            }
        }
        if let Some(pincode) = record.address.pincode.as_deref() {
            if pincode.len() != 6 || !pincode.chars().all(|c| c.is_ascii_digit()) {
                warnings.push(format!("pincode '{}' is not 6 digits", pincode));
            }
        }

        ValidationOutcome {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn apply_defaults(&self, record: &NormalizedFarmerRecord) -> NormalizedFarmerRecord {
        let mut out = record.clone();

        if out.address.country.is_none() {
            out.address.country = Some(DEFAULT_COUNTRY.to_string());
        }

        if out.external_id.is_none() {
            out.external_id = Some(Self::derive_external_id(record));
        }

        out.gender = out.gender.map(|g| match g.to_lowercase().as_str() {
            "m" => "male".to_string(),
            "f" => "female".to_string(),
            other => other.to_string(),
        });
        out.email = out.email.map(|e| e.to_lowercase());

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::farmer::FarmerAddress;
    use std::collections::BTreeMap;

    fn record(first: &str, last: &str, phone: &str) -> NormalizedFarmerRecord {
        NormalizedFarmerRecord {
            record_index: 0,
            external_id: None,
            first_name: first.to_string(),
            last_name: last.to_string(),
            phone_number: phone.to_string(),
            email: None,
            date_of_birth: None,
            gender: None,
            address: FarmerAddress::default(),
            custom_fields: BTreeMap::new(),
            password: None,
        }
    }

    #[test]
    fn test_missing_phone_is_required_error() {
        let outcome = ValidatorImpl.validate(&record("Suresh", "Patel", ""));
        assert!(!outcome.is_valid);
        assert_eq!(outcome.errors, vec!["phone_number is required".to_string()]);
    }

    #[test]
    fn test_phone_leading_digit() {
        assert!(ValidatorImpl::is_valid_mobile("9876543210"));
        assert!(ValidatorImpl::is_valid_mobile("6000000000"));
        assert!(!ValidatorImpl::is_valid_mobile("5876543210"));
        assert!(!ValidatorImpl::is_valid_mobile("987654321"));

        let outcome = ValidatorImpl.validate(&record("A", "B", "12345"));
        assert_eq!(
            outcome.errors,
            vec!["phone_number must be a 10-digit mobile number starting with 6-9".to_string()]
        );
    }

    #[test]
    fn test_email_and_gender() {
        let mut rec = record("A", "B", "9876543210");
        rec.email = Some("not-an-email".to_string());
        rec.gender = Some("Unknown".to_string());
        let outcome = ValidatorImpl.validate(&rec);
        assert_eq!(outcome.errors.len(), 2);

        rec.email = Some("a@b.in".to_string());
        rec.gender = Some("F".to_string());
        assert!(ValidatorImpl.validate(&rec).is_valid);
    }

    #[test]
    fn test_warnings_do_not_fail_record() {
        let mut rec = record("A", "B", "9876543210");
        rec.date_of_birth = Some("15/03/1985".to_string());
        rec.address.pincode = Some("3880".to_string());
        let outcome = ValidatorImpl.validate(&rec);
        assert!(outcome.is_valid);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_apply_defaults() {
        let mut rec = record("Suresh", "Patel", "9876543220");
        rec.gender = Some("m".to_string());
        let out = ValidatorImpl.apply_defaults(&rec);

        assert_eq!(out.address.country.as_deref(), Some("India"));
        assert_eq!(out.external_id.as_deref(), Some("FRM-9876543220-11"));
        assert_eq!(out.gender.as_deref(), Some("male"));
        // 原记录不变
        assert!(rec.external_id.is_none());
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_values() {
        let mut rec = record("A", "B", "9876543210");
        rec.external_id = Some("EXT-1".to_string());
        rec.address.country = Some("Nepal".to_string());
        let out = ValidatorImpl.apply_defaults(&rec);
        assert_eq!(out.external_id.as_deref(), Some("EXT-1"));
        assert_eq!(out.address.country.as_deref(), Some("Nepal"));
    }

    #[test]
    fn test_derived_external_id_is_deterministic() {
        let a = record("Suresh", "Patel", "9876543220");
        let b = record("Suresh", "Patel", "9876543220");
        assert_eq!(
            ValidatorImpl::derive_external_id(&a),
            ValidatorImpl::derive_external_id(&b)
        );
    }
}
