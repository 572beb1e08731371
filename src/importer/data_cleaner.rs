// ==========================================
// 农户批量入驻 - 数据清洗器实现
// ==========================================
// 职责: NULL 标准化 / 手机号规范化 / 日期规范化
// 红线: 清洗不丢弃记录，不合法值留给校验器拒绝
// ==========================================

use crate::importer::importer_trait::DataCleaner as DataCleanerTrait;

/// 可折叠的国家码（印度）
const COUNTRY_PREFIX: &str = "91";

/// 规范手机号长度
pub const CANONICAL_PHONE_LEN: usize = 10;

pub struct DataCleaner;

impl DataCleanerTrait for DataCleaner {
    fn normalize_null(&self, value: Option<String>) -> Option<String> {
        value.and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn normalize_phone(&self, value: &str) -> String {
        let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();

        // +91 / 0091 前缀: 12 位且以 91 开头 → 取后 10 位
        if digits.len() == CANONICAL_PHONE_LEN + COUNTRY_PREFIX.len()
            && digits.starts_with(COUNTRY_PREFIX)
        {
            return digits[COUNTRY_PREFIX.len()..].to_string();
        }

        // 国内长途前缀: 11 位且以 0 开头 → 取后 10 位
        if digits.len() == CANONICAL_PHONE_LEN + 1 && digits.starts_with('0') {
            return digits[1..].to_string();
        }

        digits
    }

    fn normalize_date(&self, value: &str) -> String {
        let trimmed = value.trim();
        if trimmed.len() == 8 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            // YYYYMMDD → YYYY-MM-DD（不做日历校验）
            return format!("{}-{}-{}", &trimmed[0..4], &trimmed[4..6], &trimmed[6..8]);
        }
        trimmed.to_string()
    }
}

impl DataCleaner {
    /// 清洗可选文本字段（TRIM + 空值归一）
    pub fn clean_optional(&self, value: Option<&String>) -> Option<String> {
        self.normalize_null(value.cloned())
    }

    /// 清洗邮箱（TRIM + 小写）
    pub fn clean_email(&self, value: Option<&String>) -> Option<String> {
        self.clean_optional(value).map(|v| v.to_lowercase())
    }

    /// 清洗性别（TRIM + 小写，取值校验在校验器中进行）
    pub fn clean_gender(&self, value: Option<&String>) -> Option<String> {
        self.clean_optional(value).map(|v| v.to_lowercase())
    }
}
