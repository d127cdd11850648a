use crate::config::{
    AppConfig, GoogleAuthConfig, LinkedInCredentials, MonitorFileConfig, Secret,
    DEFAULT_GOOGLE_CREDENTIALS_PATH,
};
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "linkedin-sheet-monitor")]
#[command(about = "Continuously enrich a Google Sheet of LinkedIn URLs with scraped data")]
pub struct CliConfig {
    #[arg(long, env = "SHEET_ID", help = "Google Sheet ID holding the target URLs")]
    pub sheet_id: Option<String>,

    #[arg(long, env = "APIFY_TOKEN", hide_env_values = true)]
    pub apify_token: Option<String>,

    #[arg(long, env = "LINKEDIN_USERNAME")]
    pub linkedin_username: Option<String>,

    #[arg(long, env = "LINKEDIN_PASSWORD", hide_env_values = true)]
    pub linkedin_password: Option<String>,

    #[arg(long, env = "MONITOR_CONFIG", help = "TOML file with schedule/retry/extraction settings")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Read targets from a .txt/.csv file instead of the sheet")]
    pub targets_file: Option<PathBuf>,

    #[arg(long, help = "Write results to a local CSV file instead of the sheet")]
    pub output_csv: Option<PathBuf>,

    #[arg(long, env = "PORT", default_value_t = crate::config::DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, help = "Show the browser window")]
    pub visible: bool,

    #[arg(long, help = "Seconds to wait between targets")]
    pub wait: Option<u64>,

    #[arg(long, help = "Run a single cycle and exit")]
    pub once: bool,

    #[arg(long, help = "Do not start the HTTP status server")]
    pub no_server: bool,

    #[arg(long, short, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[arg(long, help = "Log CPU and memory usage after each cycle")]
    pub monitor: bool,

    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_FILE", default_value = DEFAULT_GOOGLE_CREDENTIALS_PATH)]
    pub google_credentials_file: PathBuf,

    #[arg(long, env = "GOOGLE_CREDENTIALS", hide_env_values = true)]
    pub google_credentials: Option<String>,

    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    pub google_access_token: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl AppConfig {
    /// 合併 CLI/環境變數與 TOML 設定並驗證
    pub fn resolve(cli: &CliConfig) -> Result<Self> {
        let mut settings = match &cli.config {
            Some(path) => {
                tracing::info!("📄 Loading settings from {}", path.display());
                MonitorFileConfig::from_file(path)?
            }
            None => MonitorFileConfig::default(),
        };
        if let Some(wait) = cli.wait {
            settings.schedule.target_delay_secs = wait;
        }

        let linkedin = match (non_empty(&cli.linkedin_username), non_empty(&cli.linkedin_password)) {
            (Some(username), Some(password)) => Some(LinkedInCredentials {
                username,
                password: Secret::new(password),
            }),
            _ => None,
        };

        let config = AppConfig {
            sheet_id: non_empty(&cli.sheet_id),
            apify_token: non_empty(&cli.apify_token).map(Secret::new),
            linkedin,
            google: GoogleAuthConfig {
                access_token: non_empty(&cli.google_access_token).map(Secret::new),
                credentials_file: cli.google_credentials_file.clone(),
                credentials_json: non_empty(&cli.google_credentials).map(Secret::new),
            },
            targets_file: cli.targets_file.clone(),
            output_csv: cli.output_csv.clone(),
            port: cli.port,
            headless: !cli.visible,
            run_once: cli.once,
            serve: !cli.no_server,
            system_stats: cli.monitor,
            settings,
        };

        config.validate()?;
        Ok(config)
    }
}
