#[cfg(feature = "cli")]
pub mod cli;
pub mod credentials;
pub mod file;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use file::MonitorFileConfig;

use crate::core::extract::Extractor;
use crate::domain::model::TargetKind;
use crate::utils::error::{MonitorError, Result};
use crate::utils::validation::{self, Validate};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_GOOGLE_CREDENTIALS_PATH: &str = "/etc/secrets/google-credentials.json";

/// 不會出現在日誌中的字串
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedInCredentials {
    pub username: String,
    pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct GoogleAuthConfig {
    /// 預先核發的 access token，設定時不使用服務帳戶
    pub access_token: Option<Secret>,
    pub credentials_file: PathBuf,
    /// 啟動時寫入 `credentials_file` 的服務帳戶 JSON
    pub credentials_json: Option<Secret>,
}

impl Default for GoogleAuthConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            credentials_file: PathBuf::from(DEFAULT_GOOGLE_CREDENTIALS_PATH),
            credentials_json: None,
        }
    }
}

/// 合併 CLI、環境變數與 TOML 之後的最終設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sheet_id: Option<String>,
    pub apify_token: Option<Secret>,
    pub linkedin: Option<LinkedInCredentials>,
    pub google: GoogleAuthConfig,
    pub targets_file: Option<PathBuf>,
    pub output_csv: Option<PathBuf>,
    pub port: u16,
    pub headless: bool,
    pub run_once: bool,
    pub serve: bool,
    pub system_stats: bool,
    pub settings: MonitorFileConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sheet_id: None,
            apify_token: None,
            linkedin: None,
            google: GoogleAuthConfig::default(),
            targets_file: None,
            output_csv: None,
            port: DEFAULT_PORT,
            headless: true,
            run_once: false,
            serve: true,
            system_stats: false,
            settings: MonitorFileConfig::default(),
        }
    }
}

impl AppConfig {
    /// 是否需要連 Google Sheets（作為來源或輸出）
    pub fn uses_sheet(&self) -> bool {
        self.sheet_id.is_some() && (self.targets_file.is_none() || self.output_csv.is_none())
    }

    pub fn google_configured(&self) -> bool {
        self.google.access_token.is_some()
            || self.google.credentials_json.is_some()
            || self.google.credentials_file.exists()
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        if self.sheet_id.is_none() && self.targets_file.is_none() {
            return Err(MonitorError::MissingConfigError {
                field: "SHEET_ID or --targets-file".to_string(),
            });
        }
        if self.sheet_id.is_none() && self.output_csv.is_none() {
            return Err(MonitorError::MissingConfigError {
                field: "SHEET_ID or --output-csv".to_string(),
            });
        }

        if let Some(sheet_id) = &self.sheet_id {
            validation::validate_sheet_id("sheet_id", sheet_id)?;
        }
        if let Some(path) = &self.targets_file {
            validation::validate_path("targets_file", &path.to_string_lossy())?;
        }
        if let Some(path) = &self.output_csv {
            validation::validate_path("output_csv", &path.to_string_lossy())?;
        }
        validation::validate_at_least("port", self.port as u64, 1)?;

        self.settings.validate()?;

        let extractor = Extractor::from_config(&self.settings.extract)?;
        if extractor.needs_company() && self.settings.source.kinds.contains(&TargetKind::Profile) {
            let token = validation::require("APIFY_TOKEN", &self.apify_token)?;
            validation::validate_not_blank("APIFY_TOKEN", token.expose())?;
        }

        Ok(())
    }
}
