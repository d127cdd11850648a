use crate::utils::error::{MonitorError, Result};
use std::fmt::Display;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field: &str, value: impl Display, reason: impl Into<String>) -> MonitorError {
    MonitorError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// API 端點與登入頁：必須是有主機名稱的 http(s) 網址
pub fn validate_http_url(field: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| invalid(field, raw, format!("Invalid URL: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(field, raw, format!("Unsupported URL scheme: {}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid(field, raw, "URL has no host"));
    }
    Ok(())
}

pub fn validate_path(field: &str, path: &str) -> Result<()> {
    if path.is_empty() || path.contains('\0') {
        return Err(invalid(field, path, "Path must be non-empty and free of null bytes"));
    }
    Ok(())
}

pub fn validate_at_least(field: &str, value: u64, min: u64) -> Result<()> {
    if value < min {
        return Err(invalid(field, value, format!("Value must be at least {}", min)));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + Display + Copy>(field: &str, value: T, min: T, max: T) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(field, value, format!("Value must be between {} and {}", min, max)));
    }
    Ok(())
}

/// 欄位名稱、actor ID、token 等不能只有空白
pub fn validate_not_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, value, "Value cannot be blank"));
    }
    Ok(())
}

/// 必填的憑證；沒有時回報缺少設定
pub fn require<'a, T>(field: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| MonitorError::MissingConfigError {
        field: field.to_string(),
    })
}

/// Google 試算表 ID：英數字、`-`、`_`
pub fn validate_sheet_id(field: &str, sheet_id: &str) -> Result<()> {
    validate_not_blank(field, sheet_id)?;
    if !sheet_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(
            field,
            sheet_id,
            "Sheet ID can only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_urls() {
        assert!(validate_http_url("apify.base_url", "https://api.apify.com").is_ok());
        assert!(validate_http_url("sink.sheets_base_url", "http://127.0.0.1:8080").is_ok());
        assert!(validate_http_url("apify.base_url", "").is_err());
        assert!(validate_http_url("apify.base_url", "api.apify.com").is_err());
        assert!(validate_http_url("fetch.login_url", "file:///etc/passwd").is_err());
    }

    #[test]
    fn test_numbers() {
        assert!(validate_at_least("schedule.poll_interval_secs", 30, 1).is_ok());
        assert!(validate_at_least("schedule.poll_interval_secs", 0, 1).is_err());
        assert!(validate_range("retry.multiplier", 2.0, 1.0, 10.0).is_ok());
        assert!(validate_range("retry.max_attempts", 11, 1, 10).is_err());
    }

    #[test]
    fn test_validate_sheet_id() {
        assert!(validate_sheet_id("sheet_id", "1AbC-d_9").is_ok());
        assert!(validate_sheet_id("sheet_id", "   ").is_err());
        assert!(validate_sheet_id("sheet_id", "abc/def").is_err());
    }

    #[test]
    fn test_require_reports_missing_config() {
        let token = Some("apify_api_x".to_string());
        let missing: Option<String> = None;
        assert_eq!(require("APIFY_TOKEN", &token).unwrap(), "apify_api_x");
        assert!(matches!(
            require("APIFY_TOKEN", &missing),
            Err(MonitorError::MissingConfigError { .. })
        ));
        assert!(validate_path("output_csv", "").is_err());
        assert!(validate_not_blank("sink.key_column", " \t").is_err());
    }
}
