use crate::domain::model::Target;
use crate::domain::ports::TargetSource;
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Origin {
    Inline(Vec<String>),
    File { path: PathBuf, key_column: String },
}

/// 固定清單：直接給網址，或 `.txt`（一行一個，`#` 開頭為註解）/ `.csv`
#[derive(Debug, Clone)]
pub struct StaticTargetSource {
    origin: Origin,
    name: String,
}

impl StaticTargetSource {
    pub fn from_urls<S: Into<String>>(urls: Vec<S>) -> Self {
        Self {
            origin: Origin::Inline(urls.into_iter().map(Into::into).collect()),
            name: "static".to_string(),
        }
    }

    /// CSV 檔優先讀 `key_column`，沒有該欄時讀第一欄
    pub fn from_file<P: AsRef<Path>>(path: P, key_column: &str) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("file:{}", path.display()),
            origin: Origin::File {
                path,
                key_column: key_column.to_string(),
            },
        }
    }

    fn read_lines(path: &Path) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::config(format!("Cannot read targets file {}: {}", path.display(), e))
        })?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    fn read_csv(path: &Path, key_column: &str) -> Result<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| {
                MonitorError::config(format!("Cannot read targets file {}: {}", path.display(), e))
            })?;

        let idx = reader
            .headers()?
            .iter()
            .position(|h| h.trim() == key_column)
            .unwrap_or(0);

        let mut urls = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let Some(value) = record.get(idx) {
                urls.push(value.to_string());
            }
        }
        Ok(urls)
    }
}

#[async_trait]
impl TargetSource for StaticTargetSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_targets(&self) -> Result<Vec<Target>> {
        let raw = match &self.origin {
            Origin::Inline(urls) => urls.clone(),
            Origin::File { path, key_column } => {
                let is_csv = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
                if is_csv {
                    Self::read_csv(path, key_column)?
                } else {
                    Self::read_lines(path)?
                }
            }
        };

        Ok(raw
            .iter()
            .filter_map(|url| {
                let target = Target::parse(url);
                if target.is_none() && !url.trim().is_empty() {
                    tracing::debug!("Skipping non-LinkedIn target: {}", url);
                }
                target
            })
            .collect())
    }
}
