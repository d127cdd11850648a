use crate::config::LinkedInCredentials;
use crate::domain::model::is_login_wall;
use crate::domain::ports::{PageFetcher, RenderedPage};
use crate::utils::error::FetchErrorKind;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";
const SCROLL_TO_TOP: &str = "window.scrollTo(0, 0)";

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub page_timeout: Duration,
    pub settle: Duration,
    pub user_agent: Option<String>,
    pub login_url: String,
    pub credentials: Option<LinkedInCredentials>,
}

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!("Browser close returned: {}", e);
        }
        self.handler.abort();
    }
}

fn browser_error(e: impl std::fmt::Display) -> FetchErrorKind {
    FetchErrorKind::Browser(e.to_string())
}

/// 登入表單的欄位與要輸入的值
fn login_form(credentials: &LinkedInCredentials) -> [(&'static str, &str); 2] {
    [
        ("#username", credentials.username.as_str()),
        ("#password", credentials.password.expose()),
    ]
}

/// 無頭 Chromium；同一時間只有一個工作階段，第一次抓取時才啟動並登入
pub struct BrowserFetcher {
    options: BrowserOptions,
    session: Mutex<Option<BrowserSession>>,
}

impl BrowserFetcher {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            session: Mutex::new(None),
        }
    }

    async fn launch(&self) -> Result<BrowserSession, FetchErrorKind> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.options.page_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .window_size(1920, 1080);
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(agent) = &self.options.user_agent {
            builder = builder.arg(format!("--user-agent={}", agent));
        }

        let config = builder.build().map_err(browser_error)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_error)?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(browser_error)?;
        tracing::info!("🌐 Browser session started (headless: {})", self.options.headless);

        let session = BrowserSession {
            browser,
            handler,
            page,
        };

        if let Some(credentials) = &self.options.credentials {
            if let Err(e) = self.login(&session.page, credentials).await {
                session.close().await;
                return Err(e);
            }
        } else {
            tracing::warn!("⚠️ No LinkedIn credentials configured; browsing logged out");
        }

        Ok(session)
    }

    async fn login(&self, page: &Page, credentials: &LinkedInCredentials) -> Result<(), FetchErrorKind> {
        let attempt = async {
            page.goto(self.options.login_url.as_str())
                .await
                .map_err(browser_error)?;
            for (selector, value) in login_form(credentials) {
                page.find_element(selector)
                    .await
                    .map_err(browser_error)?
                    .click()
                    .await
                    .map_err(browser_error)?
                    .type_str(value)
                    .await
                    .map_err(browser_error)?;
            }
            page.find_element("button[type='submit']")
                .await
                .map_err(browser_error)?
                .click()
                .await
                .map_err(browser_error)?;
            tokio::time::sleep(self.options.settle).await;
            page.url().await.map_err(browser_error)
        };

        let landed = tokio::time::timeout(self.options.page_timeout, attempt)
            .await
            .map_err(|_| FetchErrorKind::Timeout)??;

        match landed {
            Some(url) if !is_login_wall(&url) => {
                tracing::info!("🔐 Logged in to LinkedIn as {}", credentials.username);
            }
            other => {
                // 可能遇到驗證關卡；之後的抓取若落在登入牆會回報 LoginExpired
                tracing::warn!(
                    "⚠️ LinkedIn login did not complete (landed on {:?}); continuing",
                    other
                );
            }
        }
        Ok(())
    }

    async fn render(&self, page: &Page, url: &str) -> Result<RenderedPage, FetchErrorKind> {
        let work = async {
            page.goto(url).await.map_err(browser_error)?;
            tokio::time::sleep(self.options.settle).await;

            // 觸發延遲載入
            page.evaluate(SCROLL_TO_BOTTOM).await.map_err(browser_error)?;
            tokio::time::sleep(Duration::from_secs(2)).await;
            page.evaluate(SCROLL_TO_TOP).await.map_err(browser_error)?;
            tokio::time::sleep(Duration::from_secs(1)).await;

            let final_url = page
                .url()
                .await
                .map_err(browser_error)?
                .unwrap_or_else(|| url.to_string());
            let html = page.content().await.map_err(browser_error)?;
            Ok(RenderedPage {
                url: final_url,
                html,
            })
        };

        tokio::time::timeout(self.options.page_timeout + self.options.settle, work)
            .await
            .map_err(|_| FetchErrorKind::Timeout)?
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<RenderedPage, FetchErrorKind> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let Some(session) = guard.as_ref() else {
            return Err(FetchErrorKind::Browser("browser session unavailable".to_string()));
        };

        let result = self.render(&session.page, url).await;

        let drop_session = match &result {
            Ok(page) if is_login_wall(&page.url) => true,
            Err(FetchErrorKind::Browser(_)) => true,
            _ => false,
        };
        if drop_session {
            if let Some(session) = guard.take() {
                session.close().await;
            }
        }

        match result {
            Ok(page) if is_login_wall(&page.url) => {
                tracing::warn!("🔒 Redirected to login wall while fetching {}", url);
                Err(FetchErrorKind::LoginExpired)
            }
            other => other,
        }
    }

    async fn shutdown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
            tracing::info!("🛑 Browser session closed");
        }
    }
}
