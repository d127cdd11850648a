use crate::adapters::build_client;
use crate::domain::model::Target;
use crate::domain::ports::CompanyResolver;
use crate::utils::error::FetchErrorKind;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// 透過 Apify 的 LinkedIn 個人頁 actor 找出目前任職公司
pub struct ApifyCompanyResolver {
    client: Client,
    base_url: String,
    actor_id: String,
    token: String,
}

impl ApifyCompanyResolver {
    pub fn new(
        base_url: impl Into<String>,
        actor_id: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> crate::utils::error::Result<Self> {
        let client = build_client(Client::builder().timeout(timeout))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            actor_id: actor_id.into(),
            token: token.into(),
        })
    }

    fn run_url(&self) -> String {
        format!(
            "{}/v2/acts/{}/run-sync-get-dataset-items",
            self.base_url, self.actor_id
        )
    }

    /// 第一段經歷的公司連結
    fn current_company(items: &[Value]) -> Option<Target> {
        items.iter().find_map(|item| {
            let link = item
                .get("experiences")?
                .as_array()?
                .first()?
                .get("companyLink1")?
                .as_str()?;
            Target::company(link)
        })
    }
}

#[async_trait]
impl CompanyResolver for ApifyCompanyResolver {
    async fn resolve(&self, profile: &Target) -> Result<Option<Target>, FetchErrorKind> {
        let input = json!({
            "profileUrls": [profile.url()],
            "includeExperienceData": true,
        });

        tracing::debug!("🔎 Resolving company for {} via Apify", profile);

        let response = self
            .client
            .post(self.run_url())
            .query(&[("token", self.token.as_str())])
            .json(&input)
            .send()
            .await
            .map_err(|e| FetchErrorKind::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchErrorKind::from_status(status.as_u16()));
        }

        let items: Vec<Value> = response
            .json()
            .await
            .map_err(|e| FetchErrorKind::Network(format!("invalid Apify response: {}", e)))?;

        let company = Self::current_company(&items);
        if company.is_none() {
            tracing::warn!("⚠️ No current company found for {}", profile);
        }
        Ok(company)
    }
}
