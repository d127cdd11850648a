use crate::adapters::apify::ApifyCompanyResolver;
use crate::adapters::csv_file::CsvFileSink;
use crate::adapters::google_auth::{ServiceAccountTokenProvider, StaticToken, TokenProvider};
use crate::adapters::http_fetcher::HttpFetcher;
use crate::adapters::sheets::{SheetSink, SheetTargetSource, SheetsClient};
use crate::adapters::static_source::StaticTargetSource;
use crate::api::ServiceInfo;
use crate::config::credentials::materialize_service_account;
use crate::config::file::FetchEngine;
use crate::config::AppConfig;
use crate::core::extract::Extractor;
use crate::core::monitor::{ContinuousMonitor, MonitorSettings};
use crate::core::queue::TargetQueue;
use crate::core::worker::{FetchExtractWorker, RetryPolicy};
use crate::domain::ports::{PageFetcher, RecordSink, TargetSource};
use crate::utils::error::{MonitorError, Result};
use crate::utils::monitor::SystemMonitor;
use std::sync::Arc;
use std::time::Duration;

/// 組好的監控器與對外顯示的服務資訊
pub struct Assembled {
    pub monitor: ContinuousMonitor,
    pub info: ServiceInfo,
}

fn token_provider(config: &AppConfig) -> Result<Arc<dyn TokenProvider>> {
    if let Some(token) = &config.google.access_token {
        tracing::info!("🔑 Using pre-issued Google access token");
        return Ok(Arc::new(StaticToken::new(token.expose())));
    }

    let path = &config.google.credentials_file;
    if let Some(json) = &config.google.credentials_json {
        materialize_service_account(json.expose(), path)?;
    }
    if !path.exists() {
        return Err(MonitorError::MissingConfigError {
            field: format!(
                "Google credentials (GOOGLE_CREDENTIALS, GOOGLE_ACCESS_TOKEN or {})",
                path.display()
            ),
        });
    }

    let provider = ServiceAccountTokenProvider::from_file(path)?;
    tracing::info!("🔑 Using service account {}", provider.client_email());
    Ok(Arc::new(provider))
}

fn page_fetcher(config: &AppConfig) -> Result<Arc<dyn PageFetcher>> {
    let fetch = &config.settings.fetch;
    let timeout = Duration::from_secs(fetch.page_timeout_secs);

    let fetcher: Arc<dyn PageFetcher> = match fetch.engine {
        #[cfg(feature = "browser")]
        FetchEngine::Browser => {
            use crate::adapters::browser::{BrowserFetcher, BrowserOptions};
            Arc::new(BrowserFetcher::new(BrowserOptions {
                headless: config.headless,
                page_timeout: timeout,
                settle: Duration::from_secs(fetch.settle_secs),
                user_agent: fetch.user_agent.clone(),
                login_url: fetch.login_url.clone(),
                credentials: config.linkedin.clone(),
            }))
        }
        #[cfg(not(feature = "browser"))]
        FetchEngine::Browser => {
            tracing::warn!("⚠️ Built without the `browser` feature; falling back to plain HTTP fetching");
            Arc::new(HttpFetcher::new(timeout, fetch.user_agent.as_deref())?)
        }
        FetchEngine::Http => Arc::new(HttpFetcher::new(timeout, fetch.user_agent.as_deref())?),
    };
    Ok(fetcher)
}

/// 依設定組裝來源、輸出、抓取器與迴圈
pub fn assemble(config: &AppConfig) -> Result<Assembled> {
    let settings = &config.settings;

    let sheets = match (&config.sheet_id, config.uses_sheet()) {
        (Some(sheet_id), true) => Some(Arc::new(
            SheetsClient::new(
                settings.sink.sheets_base_url.clone(),
                sheet_id.clone(),
                token_provider(config)?,
            )?
            .with_worksheet(settings.sink.worksheet.clone()),
        )),
        _ => None,
    };

    let (source, source_name): (Arc<dyn TargetSource>, String) = match (&config.targets_file, &sheets) {
        (Some(path), _) => {
            let source = StaticTargetSource::from_file(path, &settings.sink.key_column);
            let name = source.name().to_string();
            (Arc::new(source), name)
        }
        (None, Some(client)) => (
            Arc::new(SheetTargetSource::new(client.clone(), settings.sink.key_column.clone())),
            "google-sheet".to_string(),
        ),
        (None, None) => {
            return Err(MonitorError::MissingConfigError {
                field: "SHEET_ID or --targets-file".to_string(),
            })
        }
    };

    let sink: Arc<dyn RecordSink> = match (&config.output_csv, &sheets) {
        (Some(path), _) => Arc::new(CsvFileSink::new(path)),
        (None, Some(client)) => Arc::new(SheetSink::new(client.clone())),
        (None, None) => {
            return Err(MonitorError::MissingConfigError {
                field: "SHEET_ID or --output-csv".to_string(),
            })
        }
    };

    let extractor = Extractor::from_config(&settings.extract)?;
    let mut worker = FetchExtractWorker::new(
        page_fetcher(config)?,
        extractor,
        RetryPolicy::from(&settings.retry),
    );
    if let Some(token) = &config.apify_token {
        worker = worker.with_resolver(Arc::new(ApifyCompanyResolver::new(
            settings.apify.base_url.clone(),
            settings.apify.actor_id.clone(),
            token.expose(),
            Duration::from_secs(settings.apify.timeout_secs),
        )?));
    }

    let queue = TargetQueue::new(source, settings.source.kinds.clone());
    let info = ServiceInfo {
        sheet_id: config.sheet_id.clone(),
        credentials_configured: config.google_configured(),
        source: source_name,
        sink: sink.name().to_string(),
    };

    let monitor = ContinuousMonitor::new(queue, worker, sink, MonitorSettings::from(settings))
        .with_system_monitor(SystemMonitor::new(config.system_stats));

    Ok(Assembled { monitor, info })
}
