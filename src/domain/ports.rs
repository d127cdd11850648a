use crate::domain::model::{RowWrite, SinkSnapshot, Target};
use crate::utils::error::{FetchErrorKind, Result};
use async_trait::async_trait;

/// 瀏覽器或 HTTP 取回的完整頁面
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// 轉址後實際停留的網址
    pub url: String,
    pub html: String,
}

/// 目標佇列的來源（試算表或固定清單）
#[async_trait]
pub trait TargetSource: Send + Sync {
    fn name(&self) -> &str;
    async fn load_targets(&self) -> Result<Vec<Target>>;
}

/// 「給網址、取回渲染後頁面」的外部能力
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<RenderedPage, FetchErrorKind>;

    /// 釋放瀏覽器等重量級資源
    async fn shutdown(&self) {}
}

/// 由個人頁找出目前任職公司
#[async_trait]
pub trait CompanyResolver: Send + Sync {
    async fn resolve(&self, profile: &Target) -> std::result::Result<Option<Target>, FetchErrorKind>;
}

/// 以列為單位的持久化儲存；每次 `write_row` 必須整列一次生效
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;
    async fn snapshot(&self) -> Result<SinkSnapshot>;
    async fn write_row(&self, write: &RowWrite) -> Result<()>;
}
