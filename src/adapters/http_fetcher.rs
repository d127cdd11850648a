use crate::adapters::build_client;
use crate::domain::model::is_login_wall;
use crate::domain::ports::{PageFetcher, RenderedPage};
use crate::utils::error::FetchErrorKind;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 不經瀏覽器、直接 GET 的抓取器
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> crate::utils::error::Result<Self> {
        let client = build_client(
            Client::builder()
                .timeout(timeout)
                .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT)),
        )?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RenderedPage, FetchErrorKind> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchErrorKind::from_reqwest(&e))?;

        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(FetchErrorKind::from_status(status.as_u16()));
        }
        if is_login_wall(&final_url) {
            return Err(FetchErrorKind::LoginExpired);
        }

        let html = response
            .text()
            .await
            .map_err(|e| FetchErrorKind::from_reqwest(&e))?;

        Ok(RenderedPage {
            url: final_url,
            html,
        })
    }
}
