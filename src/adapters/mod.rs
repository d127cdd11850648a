// Adapters layer: concrete implementations of the domain ports (Sheets, Apify, browser, files).

pub mod apify;
#[cfg(feature = "browser")]
pub mod browser;
pub mod csv_file;
pub mod google_auth;
pub mod grid;
pub mod http_fetcher;
pub mod memory;
pub mod sheets;
pub mod static_source;

use crate::utils::error::{MonitorError, Result};

/// 建立帶逾時的 HTTP client；失敗時不退回沒有逾時的預設 client
pub(crate) fn build_client(builder: reqwest::ClientBuilder) -> Result<reqwest::Client> {
    builder
        .build()
        .map_err(|e| MonitorError::config(format!("Cannot build HTTP client: {}", e)))
}
