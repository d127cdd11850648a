use std::fmt;
use thiserror::Error;

/// 抓取失敗的種類，決定是否值得重試
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    RateLimited,
    Network(String),
    Status(u16),
    LoginExpired,
    Browser(String),
}

impl FetchErrorKind {
    /// 暫時性錯誤：逾時、限流、連線問題、伺服器 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            FetchErrorKind::Timeout | FetchErrorKind::RateLimited | FetchErrorKind::Network(_) => {
                true
            }
            FetchErrorKind::Status(code) => *code >= 500,
            FetchErrorKind::LoginExpired | FetchErrorKind::Browser(_) => false,
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchErrorKind::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16());
        }
        FetchErrorKind::Network(err.to_string())
    }

    pub fn from_status(code: u16) -> Self {
        match code {
            429 => FetchErrorKind::RateLimited,
            other => FetchErrorKind::Status(other),
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Timeout => write!(f, "timed out"),
            FetchErrorKind::RateLimited => write!(f, "rate limited"),
            FetchErrorKind::Network(msg) => write!(f, "network error: {}", msg),
            FetchErrorKind::Status(code) => write!(f, "unexpected HTTP status {}", code),
            FetchErrorKind::LoginExpired => write!(f, "login expired"),
            FetchErrorKind::Browser(msg) => write!(f, "browser error: {}", msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Fetch failed for {url} after {attempts} attempt(s): {kind}")]
    FetchError {
        url: String,
        kind: FetchErrorKind,
        attempts: u32,
    },

    #[error("Extraction failed for {url}: {message}")]
    ExtractionError { url: String, message: String },

    #[error("Sink error: {message}")]
    SinkError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Fetch,
    Extraction,
    Sink,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl MonitorError {
    pub fn config(message: impl Into<String>) -> Self {
        MonitorError::ConfigError {
            message: message.into(),
        }
    }

    pub fn sink(message: impl Into<String>) -> Self {
        MonitorError::SinkError {
            message: message.into(),
        }
    }

    pub fn extraction(url: impl Into<String>, message: impl Into<String>) -> Self {
        MonitorError::ExtractionError {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            MonitorError::ConfigError { .. }
            | MonitorError::MissingConfigError { .. }
            | MonitorError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            MonitorError::FetchError { .. } => ErrorCategory::Fetch,
            MonitorError::ExtractionError { .. } => ErrorCategory::Extraction,
            MonitorError::SinkError { .. } => ErrorCategory::Sink,
            MonitorError::IoError(_)
            | MonitorError::SerializationError(_)
            | MonitorError::CsvError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Configuration => ErrorSeverity::Critical,
            ErrorCategory::Fetch => ErrorSeverity::Medium,
            ErrorCategory::Extraction => ErrorSeverity::Low,
            ErrorCategory::Sink => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::High,
        }
    }

    /// 抓取錯誤看種類；寫入錯誤等下一輪整批重試
    pub fn is_retryable(&self) -> bool {
        match self {
            MonitorError::FetchError { kind, .. } => kind.is_transient(),
            MonitorError::SinkError { .. } => true,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            MonitorError::ConfigError { .. }
            | MonitorError::MissingConfigError { .. }
            | MonitorError::InvalidConfigValueError { .. } => {
                "Check SHEET_ID, credentials and the TOML config file, then restart"
            }
            MonitorError::FetchError { kind, .. } => match kind {
                FetchErrorKind::LoginExpired => "Verify LINKEDIN_USERNAME / LINKEDIN_PASSWORD",
                FetchErrorKind::RateLimited => "Increase --wait or the poll interval",
                _ => "The target will be retried on the next cycle",
            },
            MonitorError::ExtractionError { .. } => {
                "Page structure changed; review the extraction rules for this target"
            }
            MonitorError::SinkError { .. } => {
                "Check spreadsheet access; the whole cycle is retried on the next tick"
            }
            MonitorError::IoError(_) => "Check file paths and permissions",
            MonitorError::SerializationError(_) | MonitorError::CsvError(_) => {
                "Check the format of the input data"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            MonitorError::ConfigError { message } => format!("設定錯誤: {}", message),
            MonitorError::MissingConfigError { field } => format!("缺少必要設定: {}", field),
            MonitorError::InvalidConfigValueError { field, reason, .. } => {
                format!("設定值無效 ({}): {}", field, reason)
            }
            MonitorError::FetchError { url, kind, .. } => {
                format!("無法載入頁面 {}: {}", url, kind)
            }
            MonitorError::ExtractionError { url, message } => {
                format!("無法解析頁面 {}: {}", url, message)
            }
            MonitorError::SinkError { message } => format!("試算表寫入失敗: {}", message),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(FetchErrorKind::RateLimited.is_transient());
        assert!(FetchErrorKind::Status(503).is_transient());
        assert!(!FetchErrorKind::Status(404).is_transient());
        assert!(!FetchErrorKind::LoginExpired.is_transient());
        assert_eq!(FetchErrorKind::from_status(429), FetchErrorKind::RateLimited);
    }

    #[test]
    fn categories_drive_severity() {
        let err = MonitorError::config("bad");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.severity(), ErrorSeverity::Critical);

        let err = MonitorError::extraction("https://www.linkedin.com/in/a", "missing");
        assert_eq!(err.severity(), ErrorSeverity::Low);
        assert!(!err.is_retryable());

        let err = MonitorError::sink("unreachable");
        assert!(err.is_retryable());
    }
}
