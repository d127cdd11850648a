use crate::domain::model::{SeenSet, Target, TargetKind};
use crate::domain::ports::TargetSource;
use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 哪些目標本輪需要(重新)抓取
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescrapePolicy {
    /// 每輪都重抓
    Always,
    /// 尚未寫入，或輸出欄位仍有空白
    #[default]
    Missing,
    /// 只抓尚未寫入的
    New,
}

/// 本次執行中失敗過的目標及最後一次失敗的輪次
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureLog {
    last_failed: HashMap<String, u64>,
}

impl FailureLog {
    pub fn record_failure(&mut self, key: &str, cycle: u64) {
        self.last_failed.insert(key.to_string(), cycle);
    }

    pub fn clear(&mut self, key: &str) {
        self.last_failed.remove(key);
    }

    pub fn last_failed(&self, key: &str) -> Option<u64> {
        self.last_failed.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.last_failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_failed.is_empty()
    }
}

pub struct TargetQueue {
    source: Arc<dyn TargetSource>,
    kinds: Vec<TargetKind>,
}

impl TargetQueue {
    pub fn new(source: Arc<dyn TargetSource>, kinds: Vec<TargetKind>) -> Self {
        Self { source, kinds }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// 讀取來源、依網址去重（保留第一次出現）、過濾種類
    pub async fn load(&self) -> Result<Vec<Target>> {
        let raw = self.source.load_targets().await?;
        let total = raw.len();

        let mut seen_keys = HashSet::new();
        let targets: Vec<Target> = raw
            .into_iter()
            .filter(|t| self.kinds.contains(&t.kind()))
            .filter(|t| seen_keys.insert(t.key().to_string()))
            .collect();

        tracing::debug!(
            "📋 Loaded {} target(s) from {} ({} before dedupe/filter)",
            targets.len(),
            self.source.name(),
            total
        );

        Ok(targets)
    }

    /// 依重抓策略挑出本輪要處理的目標，再套用每輪上限。
    ///
    /// 沒失敗過的目標排在前面；失敗過的依最後失敗輪次由舊到新排，
    /// 所以一直失敗的目標不會佔住上限。
    pub fn plan<S: AsRef<str>>(
        targets: &[Target],
        seen: &SeenSet,
        policy: RescrapePolicy,
        output_columns: &[S],
        failures: &FailureLog,
        limit: Option<usize>,
    ) -> Vec<Target> {
        let mut selected: Vec<&Target> = targets
            .iter()
            .filter(|target| match policy {
                RescrapePolicy::Always => true,
                RescrapePolicy::New => !seen.contains(target.key()),
                RescrapePolicy::Missing => seen
                    .get(target.key())
                    .map_or(true, |entry| !entry.is_complete(output_columns)),
            })
            .collect();
        // 穩定排序，同一組內保留來源順序
        selected.sort_by_key(|target| failures.last_failed(target.key()));

        let take = limit.unwrap_or(selected.len());
        selected.into_iter().take(take).cloned().collect()
    }
}
