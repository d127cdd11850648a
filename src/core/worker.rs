use crate::config::file::RetryConfig;
use crate::core::extract::Extractor;
use crate::domain::model::{Record, Target, TargetKind};
use crate::domain::ports::{CompanyResolver, PageFetcher};
use crate::utils::error::{FetchErrorKind, MonitorError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 指數退避重試
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// 測試用：不等待
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// 第 `attempt` 次失敗後要等多久（從 1 起算）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// 每個目標：(找公司) → 抓頁面 → 套規則 → Record
pub struct FetchExtractWorker {
    fetcher: Arc<dyn PageFetcher>,
    resolver: Option<Arc<dyn CompanyResolver>>,
    extractor: Extractor,
    retry: RetryPolicy,
}

impl FetchExtractWorker {
    pub fn new(fetcher: Arc<dyn PageFetcher>, extractor: Extractor, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            resolver: None,
            extractor,
            retry,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CompanyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub async fn shutdown(&self) {
        self.fetcher.shutdown().await;
    }

    pub async fn process(&self, target: &Target) -> Result<Record> {
        let company = self.company_for(target).await?;
        let planned = self.extractor.pages_for(target, company.as_ref())?;

        let mut pages = HashMap::new();
        for page in planned {
            tracing::debug!("🌐 Fetching {} page for {}: {}", page.name, target, page.url);
            let rendered = self
                .with_retry(&page.url, || self.fetcher.fetch(&page.url))
                .await?;
            pages.insert(page.name, rendered);
        }

        let fields = self.extractor.extract(target, &pages)?;
        Ok(Record::new(target, fields))
    }

    async fn company_for(&self, target: &Target) -> Result<Option<Target>> {
        if !self.extractor.needs_company() {
            return Ok(None);
        }
        if target.kind() == TargetKind::Company {
            return Ok(Some(target.clone()));
        }

        let resolver = self.resolver.as_ref().ok_or_else(|| {
            MonitorError::extraction(target.url(), "no company resolver configured for profiles")
        })?;

        let company = self
            .with_retry(target.url(), || resolver.resolve(target))
            .await?
            .ok_or_else(|| {
                MonitorError::extraction(target.url(), "could not determine current company")
            })?;

        tracing::debug!("🏢 {} works at {}", target, company.url());
        Ok(Some(company))
    }

    async fn with_retry<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchErrorKind>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(kind) if kind.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "⚠️ Attempt {}/{} for {} failed ({}), retrying in {:?}",
                        attempt,
                        self.retry.max_attempts,
                        url,
                        kind,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(kind) => {
                    return Err(MonitorError::FetchError {
                        url: url.to_string(),
                        kind,
                        attempts: attempt,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::{ExtractConfig, FieldConfig};
    use crate::core::extract::Aggregate;
    use crate::domain::ports::RenderedPage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 依序回傳預先排好的結果
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<std::result::Result<String, FetchErrorKind>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<std::result::Result<&str, FetchErrorKind>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(|s| s.to_string()))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<RenderedPage, FetchErrorKind> {
            self.calls.lock().unwrap().push(url.to_string());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(FetchErrorKind::Status(404)));
            next.map(|html| RenderedPage {
                url: url.to_string(),
                html,
            })
        }
    }

    struct FixedResolver(Option<&'static str>);

    #[async_trait]
    impl CompanyResolver for FixedResolver {
        async fn resolve(
            &self,
            _profile: &Target,
        ) -> std::result::Result<Option<Target>, FetchErrorKind> {
            Ok(self.0.and_then(Target::company))
        }
    }

    fn title_extractor() -> Extractor {
        let config = ExtractConfig {
            pages: Vec::new(),
            fields: vec![FieldConfig {
                name: "title".to_string(),
                page: None,
                patterns: vec![r"title:\s*([\w ]+)".to_string()],
                selector: None,
                attribute: None,
                aggregate: Aggregate::First,
                numeric: false,
                empty_pattern: None,
                empty_value: None,
                default: None,
                required: true,
            }],
            derived: Vec::new(),
        };
        Extractor::from_config(&config).unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(FetchErrorKind::Timeout),
            Err(FetchErrorKind::RateLimited),
            Ok("<p>title: Sr Eng</p>"),
        ]));
        let worker = FetchExtractWorker::new(fetcher.clone(), title_extractor(), RetryPolicy::immediate(3));
        let alice = Target::parse("https://www.linkedin.com/in/alice").unwrap();

        let record = worker.process(&alice).await.unwrap();
        assert_eq!(record.key, "https://www.linkedin.com/in/alice");
        assert_eq!(record.fields["title"], "Sr Eng");
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_three_timeouts_is_fetch_error() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(FetchErrorKind::Timeout),
            Err(FetchErrorKind::Timeout),
            Err(FetchErrorKind::Timeout),
            Ok("<p>title: never</p>"),
        ]));
        let worker = FetchExtractWorker::new(fetcher.clone(), title_extractor(), RetryPolicy::immediate(3));
        let bob = Target::parse("https://www.linkedin.com/in/bob").unwrap();

        let err = worker.process(&bob).await.unwrap_err();
        match err {
            MonitorError::FetchError { kind, attempts, .. } => {
                assert_eq!(kind, FetchErrorKind::Timeout);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Err(FetchErrorKind::LoginExpired)]));
        let worker = FetchExtractWorker::new(fetcher.clone(), title_extractor(), RetryPolicy::immediate(3));
        let alice = Target::parse("https://www.linkedin.com/in/alice").unwrap();

        let err = worker.process(&alice).await.unwrap_err();
        assert!(matches!(err, MonitorError::FetchError { attempts: 1, .. }));
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_extraction_error() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok("<p>nothing here</p>")]));
        let worker = FetchExtractWorker::new(fetcher, title_extractor(), RetryPolicy::immediate(3));
        let alice = Target::parse("https://www.linkedin.com/in/alice").unwrap();

        let err = worker.process(&alice).await.unwrap_err();
        assert!(matches!(err, MonitorError::ExtractionError { .. }));
    }

    #[tokio::test]
    async fn test_profile_resolved_to_company_ad_library() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok("<p>7 ads match</p>"),
            Ok("<p>No ads to show</p>"),
        ]));
        let extractor = Extractor::from_config(&ExtractConfig::ad_library()).unwrap();
        let worker = FetchExtractWorker::new(fetcher.clone(), extractor, RetryPolicy::immediate(3))
            .with_resolver(Arc::new(FixedResolver(Some(
                "https://www.linkedin.com/company/1035/",
            ))));
        let alice = Target::parse("https://www.linkedin.com/in/alice").unwrap();

        let record = worker.process(&alice).await.unwrap();
        assert_eq!(record.fields["Overall"], "7");
        assert_eq!(record.fields["30 days"], "0");
        assert_eq!(record.fields["LI Ads?"], "y");
        assert!(fetcher.calls()[0].ends_with("companyIds=1035"));
    }

    #[tokio::test]
    async fn test_unresolved_company_is_extraction_error() {
        let fetcher = Arc::new(ScriptedFetcher::new(Vec::new()));
        let extractor = Extractor::from_config(&ExtractConfig::ad_library()).unwrap();
        let worker = FetchExtractWorker::new(fetcher.clone(), extractor, RetryPolicy::immediate(3))
            .with_resolver(Arc::new(FixedResolver(None)));
        let alice = Target::parse("https://www.linkedin.com/in/alice").unwrap();

        let err = worker.process(&alice).await.unwrap_err();
        assert!(matches!(err, MonitorError::ExtractionError { .. }));
        assert!(fetcher.calls().is_empty());
    }
}
