use crate::core::extract::{Aggregate, Extractor};
use crate::core::queue::RescrapePolicy;
use crate::domain::model::TargetKind;
use crate::utils::error::{MonitorError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// TOML 設定檔；每個區段都可省略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorFileConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub apify: ApifyConfig,
    #[serde(default = "ExtractConfig::ad_library")]
    pub extract: ExtractConfig,
}

impl Default for MonitorFileConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            retry: RetryConfig::default(),
            fetch: FetchConfig::default(),
            source: SourceConfig::default(),
            sink: SinkConfig::default(),
            apify: ApifyConfig::default(),
            extract: ExtractConfig::ad_library(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub policy: RescrapePolicy,
    pub max_targets_per_cycle: Option<usize>,
    pub target_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            error_backoff_secs: 30,
            policy: RescrapePolicy::Missing,
            max_targets_per_cycle: Some(10),
            target_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchEngine {
    Browser,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub engine: FetchEngine,
    pub page_timeout_secs: u64,
    pub settle_secs: u64,
    pub user_agent: Option<String>,
    pub login_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            engine: FetchEngine::Browser,
            page_timeout_secs: 60,
            settle_secs: 8,
            user_agent: None,
            login_url: "https://www.linkedin.com/login".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kinds: Vec<TargetKind>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kinds: vec![TargetKind::Profile, TargetKind::Company],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub key_column: String,
    pub worksheet: Option<String>,
    pub timestamp_column: Option<String>,
    pub sheets_base_url: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            key_column: "profileUrl".to_string(),
            worksheet: None,
            timestamp_column: None,
            sheets_base_url: "https://sheets.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApifyConfig {
    pub base_url: String,
    pub actor_id: String,
    pub timeout_secs: u64,
}

impl Default for ApifyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.apify.com".to_string(),
            actor_id: "2SyF0bVxmgGr8IVCZ".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default)]
    pub pages: Vec<PageConfig>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub derived: Vec<DerivedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub page: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub selector: Option<String>,
    pub attribute: Option<String>,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub numeric: bool,
    pub empty_pattern: Option<String>,
    pub empty_value: Option<String>,
    pub default: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedConfig {
    pub name: String,
    pub any_positive: Vec<String>,
    #[serde(default = "default_yes")]
    pub yes: String,
    #[serde(default = "default_no")]
    pub no: String,
}

fn default_yes() -> String {
    "y".to_string()
}

fn default_no() -> String {
    "n".to_string()
}

const AD_COUNT_PATTERNS: [&str; 4] = [
    r"([\d,]+)\s+ads?\s+match",
    r"([\d,]+)\s+ads?\s+found",
    r"showing\s+([\d,]+)\s+ads?",
    r"found\s+([\d,]+)\s+ads?",
];

const NO_ADS_PATTERN: &str = "No ads to show|No results found|No ads match";

impl ExtractConfig {
    /// 預設規則：公司在 LinkedIn 廣告庫的總廣告數與近 30 天廣告數
    pub fn ad_library() -> Self {
        let ad_count = |name: &str, page: &str| FieldConfig {
            name: name.to_string(),
            page: Some(page.to_string()),
            patterns: AD_COUNT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            selector: None,
            attribute: None,
            aggregate: Aggregate::Max,
            numeric: true,
            empty_pattern: Some(NO_ADS_PATTERN.to_string()),
            empty_value: Some("0".to_string()),
            default: None,
            required: true,
        };

        Self {
            pages: vec![
                PageConfig {
                    name: "overall".to_string(),
                    url: "https://www.linkedin.com/ad-library/search?companyIds={company_id}"
                        .to_string(),
                },
                PageConfig {
                    name: "last_30_days".to_string(),
                    url: "https://www.linkedin.com/ad-library/search?companyIds={company_id}&dateOption=last-30-days"
                        .to_string(),
                },
            ],
            fields: vec![
                ad_count("30 days", "last_30_days"),
                ad_count("Overall", "overall"),
            ],
            derived: vec![DerivedConfig {
                name: "LI Ads?".to_string(),
                any_positive: vec!["30 days".to_string(), "Overall".to_string()],
                yes: default_yes(),
                no: default_no(),
            }],
        }
    }
}

impl MonitorFileConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MonitorError::config(format!(
                "Cannot read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content)
            .map_err(|e| MonitorError::config(format!("TOML parsing error: {}", e)))
    }

    /// 替換環境變數 (例如 ${SHEET_ID})；未設定的保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| MonitorError::config(format!("Regex error: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_at_least(
            "schedule.poll_interval_secs",
            self.schedule.poll_interval_secs,
            1,
        )?;
        if let Some(max) = self.schedule.max_targets_per_cycle {
            validation::validate_at_least(
                "schedule.max_targets_per_cycle",
                max as u64,
                1,
            )?;
        }

        validation::validate_range("retry.max_attempts", self.retry.max_attempts, 1, 10)?;
        validation::validate_range("retry.multiplier", self.retry.multiplier, 1.0, 10.0)?;
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(MonitorError::InvalidConfigValueError {
                field: "retry.initial_delay_ms".to_string(),
                value: self.retry.initial_delay_ms.to_string(),
                reason: "Must not exceed retry.max_delay_ms".to_string(),
            });
        }

        validation::validate_at_least(
            "fetch.page_timeout_secs",
            self.fetch.page_timeout_secs,
            1,
        )?;
        validation::validate_http_url("fetch.login_url", &self.fetch.login_url)?;

        if self.source.kinds.is_empty() {
            return Err(MonitorError::InvalidConfigValueError {
                field: "source.kinds".to_string(),
                value: "[]".to_string(),
                reason: "At least one target kind is required".to_string(),
            });
        }

        validation::validate_not_blank("sink.key_column", &self.sink.key_column)?;
        validation::validate_http_url("sink.sheets_base_url", &self.sink.sheets_base_url)?;
        validation::validate_http_url("apify.base_url", &self.apify.base_url)?;
        validation::validate_not_blank("apify.actor_id", &self.apify.actor_id)?;

        // 規則能否編譯
        Extractor::from_config(&self.extract)?;

        Ok(())
    }
}

impl Validate for MonitorFileConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
